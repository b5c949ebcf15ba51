//! Exporter dispatch.
//!
//! Three mutually exclusive modes, chosen once at tracer construction:
//! a direct events-API client posting the canonical JSON event, an
//! OTLP/HTTP exporter used immediately per span (`disable_batch=true`),
//! or an OTLP/HTTP exporter fed by a bounded batch queue drained on a
//! background worker. All three absorb their own failures; none ever
//! propagates an error back into the span processor's hot path.
//!
//! The OTLP modes transmit the span itself (enriched with canonical
//! attributes by the processor), not a second, independently-built
//! representation -- see [`crate::processor::HoneytraceSpanProcessor::on_end_impl`].

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use honeytrace_core::Event;
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter as OtelSpanExporter};
use reqwest::Client as HttpClient;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::logging::SafeLogger;

/// Counters surfaced to the host for observability of the export path,
/// analogous to the `translation_failures` / drop counters the spec
/// requires.
#[derive(Debug, Default)]
pub struct ExportMetrics {
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
    pub retries: AtomicU64,
}

/// Serializes an [`Event`] into the backend's `CreateEventRequest`
/// shape: required fields default to empty maps / 0.0 when absent from
/// the canonical event.
fn to_create_event_request(event: &Event) -> serde_json::Value {
    serde_json::json!({
        "project": event.project,
        "source": event.source,
        "event_name": event.event_name,
        "event_type": event.event_type,
        "event_id": event.event_id.to_string(),
        "session_id": event.session_id.to_string(),
        "config": event.config,
        "inputs": event.inputs,
        "outputs": event.outputs,
        "metadata": event.metadata,
        "duration": event.duration_ms.unwrap_or(0.0),
    })
}

/// Direct events-API transport: one HTTP POST per event (used in both
/// immediate dispatch and as the batch worker's sink).
pub struct EventsApiClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl EventsApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn send(&self, event: &Event) -> Result<(), String> {
        let url = format!("{}/events", self.base_url.trim_end_matches('/'));
        let body = to_create_event_request(event);
        self.http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Exporter dispatch mode, chosen once at tracer construction.
pub enum Exporter {
    /// `test_mode=true` or no transport configured: accept every event
    /// and discard it. Used so tests never perform real I/O.
    NoOp,
    /// Direct events-API client, used synchronously per event.
    Client(Arc<EventsApiClient>),
    /// OTLP/HTTP immediate mode: one export call per span with a
    /// per-call timeout, against a real `opentelemetry_otlp` exporter.
    OtlpImmediate {
        exporter: Arc<Mutex<Box<dyn OtelSpanExporter>>>,
        per_call_timeout: Duration,
    },
    /// OTLP/HTTP batch mode: spans are enqueued into a bounded channel
    /// and drained by a background worker on batch-size, flush-interval,
    /// or explicit flush.
    Batch(Arc<OtlpBatchExporter>),
}

impl Exporter {
    /// Accepts one event for export. `span` carries the OTLP wire
    /// representation (ignored by the `Client` mode, which posts
    /// `event` as JSON instead). Never blocks the caller beyond a
    /// bounded enqueue; never returns an error (failures are absorbed
    /// and reflected only through metrics/logs).
    pub async fn export(&self, event: Event, span: SpanData, logger: &SafeLogger, metrics: &Arc<ExportMetrics>) {
        match self {
            Exporter::NoOp => {
                metrics.sent.fetch_add(1, Ordering::Relaxed);
            }
            Exporter::Client(client) => {
                send_with_retries(client, &event, logger, metrics).await;
            }
            Exporter::OtlpImmediate { exporter, per_call_timeout } => {
                match tokio::time::timeout(*per_call_timeout, export_spans(exporter, vec![span])).await {
                    Ok(Ok(())) => {
                        metrics.sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(e)) => {
                        logger.warn(&format!("immediate OTLP export failed: {e}"));
                        metrics.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        logger.warn("immediate OTLP export timed out");
                        metrics.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Exporter::Batch(batch) => {
                batch.enqueue(span, logger).await;
            }
        }
    }

    pub async fn flush(&self, timeout: Duration) -> bool {
        match self {
            Exporter::Batch(batch) => batch.flush(timeout).await,
            _ => true,
        }
    }

    pub async fn shutdown(&self) {
        if let Exporter::Batch(batch) = self {
            batch.shutdown().await;
        }
    }
}

/// Calls the underlying OTLP exporter, which requires `&mut self`
/// despite being shared across concurrent callers -- hence the mutex.
async fn export_spans(exporter: &Arc<Mutex<Box<dyn OtelSpanExporter>>>, batch: Vec<SpanData>) -> ExportResult {
    let mut guard = exporter.lock().await;
    guard.export(batch).await
}

async fn send_with_retries(
    client: &Arc<EventsApiClient>,
    event: &Event,
    logger: &SafeLogger,
    metrics: &Arc<ExportMetrics>,
) {
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_max_elapsed_time(Some(Duration::from_secs(10)))
        .build();

    let attempt = retry(backoff, || async {
        client.send(event).await.map_err(|e| {
            metrics.retries.fetch_add(1, Ordering::Relaxed);
            backoff::Error::transient(e)
        })
    })
    .await;

    match attempt {
        Ok(()) => {
            metrics.sent.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            logger.warn(&format!(
                "dropping event (started {}) after retries exhausted: {e}",
                event.start_time_rfc3339()
            ));
            metrics.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

const DEFAULT_QUEUE_CAPACITY: usize = 2048;

enum BatchMessage {
    Span(SpanData),
    Flush(tokio::sync::oneshot::Sender<bool>),
}

/// Bounded batch queue plus a background worker, draining accumulated
/// spans into a single `opentelemetry_otlp` export call. On overflow
/// the newest span is dropped and a drop counter incremented, per the
/// backpressure contract in the concurrency model.
pub struct OtlpBatchExporter {
    sender: mpsc::Sender<BatchMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<ExportMetrics>,
}

impl OtlpBatchExporter {
    pub fn new(
        exporter: Arc<Mutex<Box<dyn OtelSpanExporter>>>,
        batch_size: usize,
        flush_interval: Duration,
        logger: SafeLogger,
        metrics: Arc<ExportMetrics>,
    ) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let worker_metrics = metrics.clone();

        let handle = tokio::spawn(async move {
            let mut buffer: Vec<SpanData> = Vec::with_capacity(batch_size);
            let mut ticker = tokio::time::interval(flush_interval);

            loop {
                tokio::select! {
                    maybe_msg = receiver.recv() => {
                        match maybe_msg {
                            Some(BatchMessage::Span(span)) => {
                                buffer.push(span);
                                if buffer.len() >= batch_size {
                                    drain(&exporter, &mut buffer, &logger, &worker_metrics).await;
                                }
                            }
                            Some(BatchMessage::Flush(ack)) => {
                                drain(&exporter, &mut buffer, &logger, &worker_metrics).await;
                                let _ = ack.send(true);
                            }
                            None => {
                                drain(&exporter, &mut buffer, &logger, &worker_metrics).await;
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if !buffer.is_empty() {
                            drain(&exporter, &mut buffer, &logger, &worker_metrics).await;
                        }
                    }
                }
            }
        });

        Arc::new(Self {
            sender,
            worker: Mutex::new(Some(handle)),
            metrics,
        })
    }

    async fn enqueue(&self, span: SpanData, logger: &SafeLogger) {
        if self.sender.try_send(BatchMessage::Span(span)).is_err() {
            logger.warn("batch queue at capacity, dropping span");
            self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn flush(&self, timeout: Duration) -> bool {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self.sender.send(BatchMessage::Flush(tx)).await.is_err() {
            return false;
        }
        tokio::time::timeout(timeout, rx).await.map(|r| r.unwrap_or(false)).unwrap_or(false)
    }

    async fn shutdown(&self) {
        if let Some(handle) = self.worker.lock().await.take() {
            handle.abort();
        }
    }
}

async fn drain(
    exporter: &Arc<Mutex<Box<dyn OtelSpanExporter>>>,
    buffer: &mut Vec<SpanData>,
    logger: &SafeLogger,
    metrics: &Arc<ExportMetrics>,
) {
    if buffer.is_empty() {
        return;
    }
    let batch: Vec<SpanData> = buffer.drain(..).collect();
    let count = batch.len() as u64;
    match export_spans(exporter, batch).await {
        Ok(()) => {
            metrics.sent.fetch_add(count, Ordering::Relaxed);
        }
        Err(e) => {
            logger.warn(&format!("dropping {count} span(s) after batch export failure: {e}"));
            metrics.dropped.fetch_add(count, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use honeytrace_core::{EventType, SessionId};
    use opentelemetry::trace::{SpanContext, SpanKind, Status};
    use pretty_assertions::assert_eq;
    use std::time::SystemTime;

    fn sample_event() -> Event {
        Event::new("span", EventType::Tool, "dev", SessionId::new(), "proj", 0.0)
    }

    fn sample_span() -> SpanData {
        SpanData {
            span_context: SpanContext::empty_context(),
            parent_span_id: opentelemetry::trace::SpanId::INVALID,
            span_kind: SpanKind::Internal,
            name: "span".into(),
            start_time: SystemTime::UNIX_EPOCH,
            end_time: SystemTime::UNIX_EPOCH,
            attributes: Vec::new(),
            dropped_attributes_count: 0,
            events: Default::default(),
            links: Default::default(),
            status: Status::Unset,
            resource: std::borrow::Cow::Owned(opentelemetry_sdk::Resource::default()),
            instrumentation_lib: Default::default(),
        }
    }

    #[tokio::test]
    async fn noop_exporter_counts_sent_without_io() {
        let metrics = Arc::new(ExportMetrics::default());
        let logger = SafeLogger::global(false);
        Exporter::NoOp.export(sample_event(), sample_span(), &logger, &metrics).await;
        assert_eq!(metrics.sent.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn empty_queue_flush_returns_success_without_io() {
        let metrics = Arc::new(ExportMetrics::default());
        assert!(Exporter::NoOp.flush(Duration::from_millis(10)).await);
        let _ = metrics;
    }
}
