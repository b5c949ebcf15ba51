//! The tracer instance: the public entry point that wires together
//! configuration, logging, caching, baggage, the DSL-driven span
//! processor, provider-strategy lifecycle, and the exporter.
//!
//! Every [`TracerInstance`] is fully self-contained: no field is shared
//! with any other instance, and construction either fully succeeds
//! (processor attached, exporter chosen) or fails fast -- there is no
//! partially initialized state.

use honeytrace_core::{Event, ProviderError, ProviderResult, SessionId, ValidationError};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::export::trace::SpanExporter as OtelSpanExporter;
use opentelemetry_sdk::trace::SpanProcessor as OtelSpanProcessor;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::baggage::BaggageStore;
use crate::cache::CacheManager;
use crate::config::{TracerConfig, TracerConfigResolver, TracerOptions};
use crate::export::{EventsApiClient, ExportMetrics, Exporter, OtlpBatchExporter};
use crate::ext::HoneytraceSpanExt;
use crate::lifecycle::{detect_provider, install_provider, Lifecycle};
use crate::logging::SafeLogger;
use crate::otlp::build_otlp_exporter;
use crate::processor::{HoneytraceSpanProcessor, ProcessorMetrics};

/// A self-contained configuration + processor + exporter + context
/// tuple owned by one logical subsystem of the host application.
pub struct TracerInstance {
    pub tracer_id: String,
    config: Arc<TracerConfig>,
    logger: SafeLogger,
    cache: Arc<CacheManager>,
    baggage: Arc<BaggageStore>,
    lifecycle: Arc<Lifecycle>,
    exporter: Arc<Exporter>,
    processor_metrics: Arc<ProcessorMetrics>,
    export_metrics: Arc<ExportMetrics>,
    otel_provider: opentelemetry_sdk::trace::SdkTracerProvider,
    dispatch_task: JoinHandle<()>,
}

impl std::fmt::Debug for TracerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracerInstance").field("tracer_id", &self.tracer_id).finish()
    }
}

impl TracerInstance {
    /// Resolves configuration, builds the per-instance components, picks
    /// a provider strategy, attaches the span processor, and chooses an
    /// exporter. Fails fast with a descriptive error rather than leaving
    /// a partially initialized instance.
    pub fn init(
        options: TracerOptions,
        env: &std::collections::HashMap<String, String>,
    ) -> ProviderResult<Self> {
        let tracer_id = format!("{}", Uuid::new_v4().simple());
        let logger = SafeLogger::for_instance(&tracer_id, options.verbose.unwrap_or(false));

        let config = TracerConfigResolver::resolve_with_logger(options, env, |field, msg| {
            logger.warn(&format!("config: {field}: {msg}"));
        })
        .map_err(|e| honeytrace_core::ProviderError::AttachmentFailed(format!("config resolution failed: {e}")))?;
        let config = Arc::new(config);

        let cache = CacheManager::new(config.cache_enabled, config.cache_max_size);
        let baggage = Arc::new(BaggageStore::new(config.timeout_profile.lifecycle_timeout()));

        if let Some(project) = &config.project {
            futures::executor::block_on(baggage.set_reserved("project", project.clone()));
        }
        futures::executor::block_on(baggage.set_reserved("source", config.source.clone()));

        let (sink, mut receiver) = mpsc::unbounded_channel::<(Event, opentelemetry_sdk::export::trace::SpanData)>();

        let processor_metrics = Arc::new(ProcessorMetrics::default());
        let export_metrics = Arc::new(ExportMetrics::default());

        let processor = Arc::new(HoneytraceSpanProcessor::new(
            baggage.clone(),
            config.project.clone().unwrap_or_default(),
            config.source.clone(),
            sink,
            logger.clone(),
            processor_metrics.clone(),
            export_metrics.clone(),
        ));

        let provider_info = detect_provider();
        let (otel_provider, _name) =
            install_provider(&provider_info, processor.clone() as Arc<dyn OtelSpanProcessor>, &tracer_id)?;

        let exporter = Arc::new(build_exporter(&config, logger.clone(), export_metrics.clone())?);

        let dispatch_exporter = exporter.clone();
        let dispatch_logger = logger.clone();
        let dispatch_metrics = export_metrics.clone();
        let dispatch_task = tokio::spawn(async move {
            while let Some((event, span)) = receiver.recv().await {
                dispatch_exporter.export(event, span, &dispatch_logger, &dispatch_metrics).await;
            }
        });

        let lifecycle = Arc::new(Lifecycle::new(
            config.timeout_profile.lifecycle_timeout(),
            config.timeout_profile.flush_timeout(),
            logger.clone(),
        ));

        Ok(Self {
            tracer_id,
            config,
            logger,
            cache,
            baggage,
            lifecycle,
            exporter,
            processor_metrics,
            export_metrics,
            otel_provider,
            dispatch_task,
        })
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// An OTel-compatible tracer handle bound to this instance's
    /// provider (main or isolated, per the chosen strategy).
    pub fn get_tracer(&self, instrumentation_name: &str) -> opentelemetry_sdk::trace::Tracer {
        self.otel_provider.tracer(instrumentation_name.to_string())
    }

    pub async fn set_baggage(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        self.baggage.set(key, value).await
    }

    pub async fn get_baggage(&self, key: &str) -> Option<String> {
        self.baggage.get(key).await
    }

    pub async fn remove_baggage(&self, key: &str) -> bool {
        self.baggage.remove(key).await
    }

    /// Generates or accepts a session UUID and stores it in baggage.
    pub async fn session_start(&self, session_name: Option<String>) -> SessionId {
        let seed = self.config.session_id.map(SessionId::from_uuid);
        let sid = self.baggage.session_start(seed).await;
        if let Some(name) = session_name {
            self.baggage.set("session_name", name).await;
        }
        sid
    }

    pub async fn session_end(&self) {
        self.baggage.session_end().await;
    }

    /// Attaches structured data to the currently active span, validating
    /// `event_id` when provided. This is one of only two paths the spec
    /// allows to surface an error directly to the caller.
    ///
    /// The data rides on the span itself (via [`HoneytraceSpanExt`]), not
    /// baggage: baggage is process-wide context meant to flow forward to
    /// descendant spans, while enrichment applies to exactly the span
    /// that is current when this is called.
    pub async fn enrich_span(
        &self,
        metadata: Option<Value>,
        metrics: Option<Value>,
        feedback: Option<Value>,
        event_type: Option<String>,
        event_id: Option<String>,
    ) -> Result<(), ValidationError> {
        if let Some(raw) = &event_id {
            crate::baggage::validate_event_id(raw)?;
        }

        opentelemetry::trace::get_active_span(|span| {
            span.honeytrace_enrich(
                metadata.as_ref(),
                metrics.as_ref(),
                feedback.as_ref(),
                event_type.as_deref(),
                event_id.as_deref(),
            );
        });

        Ok(())
    }

    /// Serializes baggage onto `carrier` using the stable
    /// `baggage: k1=v1,k2=v2` format.
    pub async fn inject(&self, carrier: &mut std::collections::HashMap<String, String>) {
        self.baggage.inject(carrier).await;
    }

    pub async fn extract(&self, carrier: &std::collections::HashMap<String, String>) {
        self.baggage.extract(carrier).await;
    }

    /// Acquires the flush lock with the instance's environment-aware
    /// timeout, drains the exporter, and returns whether it completed
    /// within the timeout.
    pub async fn flush(&self, timeout_override: Option<Duration>) -> bool {
        let timeout = timeout_override.unwrap_or_else(|| self.config.timeout_profile.flush_timeout());
        let exporter = self.exporter.clone();
        self.lifecycle.flush(move || async move { exporter.flush(timeout).await }).await
    }

    /// Idempotent: the second call is a no-op. Flushes first, then
    /// releases resources. Never panics or hangs past its timeout.
    pub async fn shutdown(&self) {
        let exporter = self.exporter.clone();
        let flush_timeout = self.config.timeout_profile.flush_timeout();
        self.lifecycle
            .shutdown(move || async move {
                exporter.flush(flush_timeout).await;
                exporter.shutdown().await;
            })
            .await;
    }

    pub fn processed_span_count(&self) -> u64 {
        self.processor_metrics.spans_processed.load(Ordering::Relaxed)
    }

    pub fn dropped_span_count(&self) -> u64 {
        self.processor_metrics.spans_dropped.load(Ordering::Relaxed) + self.export_metrics.dropped.load(Ordering::Relaxed)
    }

    pub fn translation_failure_count(&self) -> u64 {
        self.processor_metrics.translation_failures.load(Ordering::Relaxed)
    }
}

impl Drop for TracerInstance {
    fn drop(&mut self) {
        self.dispatch_task.abort();
    }
}

fn build_exporter(config: &TracerConfig, logger: SafeLogger, metrics: Arc<ExportMetrics>) -> ProviderResult<Exporter> {
    if config.test_mode {
        return Ok(Exporter::NoOp);
    }

    // `api_key` is mandatory outside test mode regardless of transport;
    // config resolution already enforces this, so this is a redundant
    // defensive unwrap rather than a second validation path.
    let api_key = config
        .api_key
        .as_ref()
        .ok_or_else(|| ProviderError::AttachmentFailed("api_key missing after config resolution".into()))?;

    if !config.otlp_enabled {
        let client = Arc::new(EventsApiClient::new(config.server_url.clone(), api_key.clone(), Duration::from_secs(30)));
        return Ok(Exporter::Client(client));
    }

    let otel_exporter: Box<dyn OtelSpanExporter> =
        build_otlp_exporter(&config.server_url, api_key, Duration::from_secs(30))
            .map_err(|e| ProviderError::AttachmentFailed(format!("failed to build OTLP exporter: {e}")))?;
    let otel_exporter = Arc::new(Mutex::new(otel_exporter));

    if config.disable_batch {
        let per_call_timeout = config.timeout_profile.flush_timeout();
        Ok(Exporter::OtlpImmediate { exporter: otel_exporter, per_call_timeout })
    } else {
        Ok(Exporter::Batch(OtlpBatchExporter::new(
            otel_exporter,
            config.batch_size,
            config.flush_interval,
            logger,
            metrics,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn init_in_test_mode_succeeds_without_api_key() {
        let options = TracerOptions { test_mode: Some(true), project: Some("demo".into()), ..Default::default() };
        let tracer = TracerInstance::init(options, &test_env()).unwrap();
        assert!(!tracer.tracer_id.is_empty());
    }

    #[tokio::test]
    async fn two_instances_have_disjoint_baggage() {
        let opts = || TracerOptions { test_mode: Some(true), ..Default::default() };
        let a = TracerInstance::init(opts(), &test_env()).unwrap();
        let b = TracerInstance::init(opts(), &test_env()).unwrap();
        a.set_baggage("k", "a-value").await;
        assert!(b.get_baggage("k").await.is_none());
    }

    #[tokio::test]
    async fn session_start_round_trips_through_baggage() {
        let opts = TracerOptions { test_mode: Some(true), ..Default::default() };
        let tracer = TracerInstance::init(opts, &test_env()).unwrap();
        let sid = tracer.session_start(Some("my-session".into())).await;
        assert_eq!(tracer.get_baggage("session_id").await, Some(sid.to_string()));
    }

    #[tokio::test]
    async fn enrich_span_rejects_invalid_event_id() {
        let opts = TracerOptions { test_mode: Some(true), ..Default::default() };
        let tracer = TracerInstance::init(opts, &test_env()).unwrap();
        let err = tracer
            .enrich_span(None, None, None, None, Some("not-a-uuid".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUuid { .. }));
    }

    #[tokio::test]
    async fn flush_on_empty_queue_succeeds() {
        let opts = TracerOptions { test_mode: Some(true), ..Default::default() };
        let tracer = TracerInstance::init(opts, &test_env()).unwrap();
        assert!(tracer.flush(Some(Duration::from_millis(100))).await);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let opts = TracerOptions { test_mode: Some(true), ..Default::default() };
        let tracer = TracerInstance::init(opts, &test_env()).unwrap();
        tracer.shutdown().await;
        tracer.shutdown().await;
    }
}
