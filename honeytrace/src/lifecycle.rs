//! Lifecycle and provider-strategy coordination.
//!
//! Detects whatever tracer provider the host process already has
//! installed, picks one of three mutually exclusive integration
//! strategies, and coordinates flush/shutdown under environment-aware
//! lock timeouts. Modeled on the teacher's shutdown coordinator:
//! hooks run first, then components are shut down each under their own
//! timeout, swallowing and logging failures rather than propagating
//! them.

use honeytrace_core::{IntegrationStrategy, ProviderError, ProviderInfo, ProviderKind, ProviderResult};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::{SdkTracerProvider, SpanProcessor as OtelSpanProcessor};
use opentelemetry_sdk::Resource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use crate::logging::SafeLogger;

/// Inspects the globally installed tracer provider and classifies it.
/// The global OTel SDK does not expose a first-class "is this a
/// functioning provider" query, so detection here is conservative: the
/// default no-op provider is recognized by name, everything else is
/// treated as a custom, presumed-functioning provider, matching the
/// spec's "Custom -> treat as functioning unless proved otherwise".
pub fn detect_provider() -> ProviderInfo {
    let provider = global::tracer_provider();
    let class_name = std::any::type_name_of_val(&provider);

    if class_name.contains("noop") || class_name.contains("Noop") {
        return ProviderInfo::none_detected();
    }

    ProviderInfo {
        class_name: class_name.to_string(),
        kind: ProviderKind::Custom,
        is_functioning: true,
        supports_span_processors: true,
        integration_strategy: IntegrationStrategy::SecondaryProvider,
    }
}

/// Installs (or reuses) a tracer provider per the detected strategy and
/// attaches `processor`. Returns the provider plus a `tracer_name`
/// unique and stable for this instance's lifetime (a UUID suffix,
/// since this is a systems-language equivalent of the source's
/// `id(tracer_instance)` scheme -- see design notes).
pub fn install_provider(
    info: &ProviderInfo,
    processor: Arc<dyn OtelSpanProcessor>,
    tracer_id: &str,
) -> ProviderResult<(SdkTracerProvider, String)> {
    let tracer_name = format!("honeytrace-{tracer_id}");

    let resource = Resource::new(vec![KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_NAME,
        tracer_name.clone(),
    )]);

    let build = || {
        SdkTracerProvider::builder()
            .with_span_processor(ArcProcessor(processor.clone()))
            .with_resource(resource.clone())
            .build()
    };

    let provider = std::panic::catch_unwind(build)
        .map_err(|_| ProviderError::AttachmentFailed("panic while building provider".to_string()))?;

    match info.integration_strategy {
        IntegrationStrategy::MainProvider => {
            global::set_tracer_provider(provider.clone());
        }
        IntegrationStrategy::SecondaryProvider | IntegrationStrategy::ConsoleFallback => {
            // Isolated: deliberately not installed globally.
        }
    }

    Ok((provider, tracer_name))
}

/// Adapts an `Arc<dyn SpanProcessor>` to the concrete type the SDK
/// builder expects.
struct ArcProcessor(Arc<dyn OtelSpanProcessor>);

impl std::fmt::Debug for ArcProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl OtelSpanProcessor for ArcProcessor {
    fn on_start(&self, span: &mut opentelemetry_sdk::trace::Span, cx: &opentelemetry::Context) {
        self.0.on_start(span, cx)
    }
    fn on_end(&self, span: opentelemetry_sdk::export::trace::SpanData) {
        self.0.on_end(span)
    }
    fn force_flush(&self) -> opentelemetry_sdk::trace::TraceResult<()> {
        self.0.force_flush()
    }
    fn shutdown(&self) -> opentelemetry_sdk::trace::TraceResult<()> {
        self.0.shutdown()
    }
}

/// Coordinates flush and shutdown for one tracer instance. Owns the
/// `instance_lock` (reentrancy is achieved structurally: no method here
/// calls another while holding the guard) and the `flush_lock`.
pub struct Lifecycle {
    instance_lock: Mutex<()>,
    flush_lock: RwLock<()>,
    lifecycle_timeout: Duration,
    flush_timeout: Duration,
    is_shut_down: Arc<AtomicBool>,
    logger: SafeLogger,
}

impl Lifecycle {
    pub fn new(lifecycle_timeout: Duration, flush_timeout: Duration, logger: SafeLogger) -> Self {
        Self {
            instance_lock: Mutex::new(()),
            flush_lock: RwLock::new(()),
            lifecycle_timeout,
            flush_timeout,
            is_shut_down: Arc::new(AtomicBool::new(false)),
            logger,
        }
    }

    /// Acquires the flush lock (with the configured timeout) and runs
    /// `drain`. Returns `false` rather than hanging when the lock or the
    /// drain itself times out.
    pub async fn flush<F, Fut>(&self, drain: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        match timeout(self.flush_timeout, self.flush_lock.write()).await {
            Ok(_guard) => match timeout(self.flush_timeout, drain()).await {
                Ok(success) => success,
                Err(_) => {
                    self.logger.warn("flush timed out");
                    false
                }
            },
            Err(_) => {
                self.logger.debug("flush lock acquisition timed out");
                false
            }
        }
    }

    /// Idempotent: the second call returns immediately without
    /// repeating the shutdown sequence.
    pub async fn shutdown<F, Fut>(&self, teardown: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        if self
            .is_shut_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        match timeout(self.lifecycle_timeout, self.instance_lock.lock()).await {
            Ok(_guard) => {
                teardown().await;
            }
            Err(_) => {
                self.logger.warn("lifecycle lock timed out during shutdown, proceeding without it");
                teardown().await;
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.is_shut_down.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flush_of_empty_queue_succeeds_without_io() {
        let lifecycle = Lifecycle::new(Duration::from_millis(100), Duration::from_millis(100), SafeLogger::global(false));
        assert!(lifecycle.flush(|| async { true }).await);
    }

    #[tokio::test]
    async fn flush_times_out_rather_than_hang() {
        let lifecycle = Lifecycle::new(Duration::from_millis(50), Duration::from_millis(10), SafeLogger::global(false));
        let ok = lifecycle
            .flush(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                true
            })
            .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn shutdown_twice_is_idempotent() {
        let lifecycle = Lifecycle::new(Duration::from_millis(100), Duration::from_millis(100), SafeLogger::global(false));
        let calls = Arc::new(AtomicBool::new(false));
        let calls2 = calls.clone();
        lifecycle.shutdown(|| async move { calls2.store(true, Ordering::SeqCst); }).await;
        assert!(calls.load(Ordering::SeqCst));

        let calls3 = calls.clone();
        calls.store(false, Ordering::SeqCst);
        lifecycle.shutdown(|| async move { calls3.store(true, Ordering::SeqCst); }).await;
        assert!(!calls.load(Ordering::SeqCst));
    }

    #[test]
    fn no_functioning_provider_selects_main_strategy() {
        let info = ProviderInfo::none_detected();
        assert_eq!(info.integration_strategy, IntegrationStrategy::MainProvider);
    }
}
