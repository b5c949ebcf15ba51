//! Span processor: the hot path that turns OTel spans into canonical
//! events.
//!
//! `on_start`/`on_end` are synchronous callbacks invoked by the OTel SDK
//! on the caller's thread; neither may block on I/O nor let an error
//! propagate back into the host's call stack. All I/O happens through
//! [`crate::export::Exporter`], which itself never blocks beyond a
//! bounded enqueue or a per-call timeout.

use honeytrace_core::{Event, EventId, EventType, SessionId};
use opentelemetry::trace::{SpanId, Status};
use opentelemetry::Context as OtelContext;
use opentelemetry::KeyValue;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::trace::{Span as SdkSpan, SpanProcessor as OtelSpanProcessor};
use opentelemetry_sdk::trace::TraceResult;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;

use crate::baggage::BaggageStore;
use crate::dsl::DslBundle;
use crate::export::{ExportMetrics, Exporter};
use crate::ext::{EVENT_ID_ATTR, EVENT_TYPE_ATTR, FEEDBACK_ATTR, METADATA_ATTR, METRICS_ATTR};
use crate::logging::SafeLogger;

const RESERVED_ATTR_PREFIXES: &[&str] = &["honeyhive", "honeytrace", "traceloop"];

/// Dispatch channel into which finished events are pushed for async
/// export, decoupling the synchronous `on_end` callback from the
/// `Exporter`'s (potentially async) send path. The paired [`SpanData`]
/// carries the same event re-expressed as span attributes, for the
/// OTLP transport modes.
pub type EventSink = UnboundedSender<(Event, SpanData)>;

/// Counts of spans dropped entirely (as opposed to exported with
/// best-effort content), surfaced alongside [`ExportMetrics`].
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    pub spans_processed: AtomicU64,
    pub spans_dropped: AtomicU64,
    pub translation_failures: AtomicU64,
}

/// The honeytrace span processor. One instance per [`crate::tracer::TracerInstance`];
/// never shared across instances.
pub struct HoneytraceSpanProcessor {
    baggage: Arc<BaggageStore>,
    project: String,
    source: String,
    sink: EventSink,
    logger: SafeLogger,
    metrics: Arc<ProcessorMetrics>,
    export_metrics: Arc<ExportMetrics>,
}

impl std::fmt::Debug for HoneytraceSpanProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoneytraceSpanProcessor")
            .field("project", &self.project)
            .field("source", &self.source)
            .finish()
    }
}

impl HoneytraceSpanProcessor {
    pub fn new(
        baggage: Arc<BaggageStore>,
        project: String,
        source: String,
        sink: EventSink,
        logger: SafeLogger,
        metrics: Arc<ProcessorMetrics>,
        export_metrics: Arc<ExportMetrics>,
    ) -> Self {
        Self {
            baggage,
            project,
            source,
            sink,
            logger,
            metrics,
            export_metrics,
        }
    }

    fn on_start_impl(&self, span: &mut SdkSpan, _cx: &OtelContext) {
        let baggage_snapshot = futures::executor::block_on(self.baggage.snapshot());

        let Some(session_id) = baggage_snapshot.get("session_id") else {
            // No session context yet: the span still flows through
            // unchanged, per the on_start contract.
            return;
        };

        span.set_attribute(opentelemetry::KeyValue::new("honeyhive.session_id", session_id.clone()));
        span.set_attribute(opentelemetry::KeyValue::new("honeyhive.project", self.project.clone()));
        span.set_attribute(opentelemetry::KeyValue::new("honeyhive.source", self.source.clone()));

        if let Some(user_properties) = baggage_snapshot.get("user_properties") {
            span.set_attribute(opentelemetry::KeyValue::new(
                "honeyhive.user_properties",
                user_properties.clone(),
            ));
        }

        for (key, value) in &baggage_snapshot {
            if let Some(suffix) = key.strip_prefix("honeyhive_experiment_") {
                span.set_attribute(opentelemetry::KeyValue::new(
                    format!("honeyhive_experiment_{suffix}"),
                    value.clone(),
                ));
            }
            if key.starts_with("traceloop.association.properties.") {
                span.set_attribute(opentelemetry::KeyValue::new(key.clone(), value.clone()));
            }
        }
    }

    fn on_end_impl(&self, span: SpanData) {
        self.metrics.spans_processed.fetch_add(1, Ordering::Relaxed);

        let attrs: HashMap<String, serde_json::Value> = span
            .attributes
            .iter()
            .map(|kv| (kv.key.as_str().to_string(), value_to_json(&kv.value)))
            .collect();

        let event_type = detect_event_type(&attrs, &span.name);

        let session_id = attrs
            .get("honeyhive.session_id")
            .and_then(|v| v.as_str())
            .and_then(|s| SessionId::parse(s).ok())
            .unwrap_or_default();

        let start = system_time_to_millis(span.start_time);
        let end = system_time_to_millis(span.end_time);

        let mut event = Event::new(
            span.name.to_string(),
            event_type,
            self.source.clone(),
            session_id,
            attrs.get("honeyhive.project").and_then(|v| v.as_str()).unwrap_or(&self.project).to_string(),
            start,
        );
        event.finish(end);
        event.parent_id = parent_event_id(&span);
        if span.status != Status::Unset {
            if let Status::Error { description } = &span.status {
                event.error = Some(description.to_string());
            }
        }

        let bundle = DslBundle::shared();
        match bundle.detect_provider(&attrs) {
            Some(provider) => match bundle.map_to_canonical(&provider, &attrs) {
                Ok((inputs, outputs, config, metadata)) => {
                    event.inputs = inputs;
                    event.outputs = outputs;
                    event.config = config;
                    event.metadata = metadata;
                }
                Err(e) => {
                    self.metrics.translation_failures.fetch_add(1, Ordering::Relaxed);
                    self.logger.warn(&format!("translation failed for {provider}: {e}"));
                    build_pass_through(&mut event, &attrs, "transform_failed");
                }
            },
            None => {
                self.metrics.translation_failures.fetch_add(1, Ordering::Relaxed);
                build_pass_through(&mut event, &attrs, "unknown_provider");
            }
        }

        apply_enrichment(&mut event, &attrs, &self.logger);

        let mut wire_span = span;
        stamp_canonical_attributes(&mut wire_span, &event);

        if self.sink.send((event, wire_span)).is_err() {
            self.metrics.spans_dropped.fetch_add(1, Ordering::Relaxed);
            self.logger.warn("event sink closed, dropping span");
        }
    }
}

/// Folds the enrichment attributes set by [`crate::ext::HoneytraceSpanExt::honeytrace_enrich`]
/// back into the event, overriding whatever the DSL translation produced.
fn apply_enrichment(event: &mut Event, attrs: &HashMap<String, serde_json::Value>, logger: &SafeLogger) {
    if let Some(metadata) = parse_enrichment_object(attrs, METADATA_ATTR, logger) {
        event.metadata.extend(metadata);
    }
    if let Some(metrics) = parse_enrichment_object(attrs, METRICS_ATTR, logger) {
        event.metrics.extend(metrics);
    }
    if let Some(feedback) = parse_enrichment_object(attrs, FEEDBACK_ATTR, logger) {
        event.feedback.extend(feedback);
    }
    if let Some(raw) = attrs.get(EVENT_TYPE_ATTR).and_then(|v| v.as_str()) {
        if let Some(t) = parse_event_type(raw) {
            event.event_type = t;
        }
    }
    if let Some(raw) = attrs.get(EVENT_ID_ATTR).and_then(|v| v.as_str()) {
        match EventId::parse(raw) {
            Ok(id) => event.event_id = id,
            Err(e) => logger.warn(&format!("ignoring invalid enriched event_id {raw:?}: {e}")),
        }
    }
}

/// Parses a JSON-object-valued enrichment attribute, previously
/// JSON-encoded by [`crate::ext::HoneytraceSpanExt::honeytrace_enrich`].
fn parse_enrichment_object(
    attrs: &HashMap<String, serde_json::Value>,
    key: &str,
    logger: &SafeLogger,
) -> Option<serde_json::Map<String, serde_json::Value>> {
    let raw = attrs.get(key)?.as_str()?;
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        Ok(_) => {
            logger.warn(&format!("enrichment attribute {key} was not a JSON object, ignoring"));
            None
        }
        Err(e) => {
            logger.warn(&format!("failed to parse enrichment attribute {key}: {e}"));
            None
        }
    }
}

/// Re-expresses the canonical event's sections as `honeyhive.<section>.<key>`
/// span attributes, so the OTLP transport modes carry the same content
/// the events-API JSON client posts.
fn stamp_canonical_attributes(span: &mut SpanData, event: &Event) {
    span.attributes.push(KeyValue::new("honeyhive.event_id", event.event_id.to_string()));
    span.attributes.push(KeyValue::new("honeyhive.session_id", event.session_id.to_string()));
    span.attributes.push(KeyValue::new("honeyhive.project", event.project.clone()));
    span.attributes.push(KeyValue::new("honeyhive.event_type", format!("{:?}", event.event_type).to_lowercase()));

    for (section, values) in [
        ("inputs", &event.inputs),
        ("outputs", &event.outputs),
        ("config", &event.config),
        ("metadata", &event.metadata),
        ("metrics", &event.metrics),
        ("feedback", &event.feedback),
    ] {
        for (key, value) in values {
            span.attributes.push(KeyValue::new(format!("honeyhive.{section}.{key}"), json_to_otel_value(value)));
        }
    }
}

fn json_to_otel_value(value: &serde_json::Value) -> opentelemetry::Value {
    match value {
        serde_json::Value::Bool(b) => opentelemetry::Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                opentelemetry::Value::I64(i)
            } else if let Some(f) = n.as_f64() {
                opentelemetry::Value::F64(f)
            } else {
                opentelemetry::Value::String(n.to_string().into())
            }
        }
        serde_json::Value::String(s) => opentelemetry::Value::String(s.clone().into()),
        other => opentelemetry::Value::String(other.to_string().into()),
    }
}

fn build_pass_through(event: &mut Event, attrs: &HashMap<String, serde_json::Value>, status: &str) {
    for (key, value) in attrs {
        if RESERVED_ATTR_PREFIXES.iter().any(|p| key.starts_with(p)) {
            continue;
        }
        event.outputs.insert(key.clone(), value.clone());
    }
    event.metadata.insert("translation_status".to_string(), serde_json::json!(status));
}

fn detect_event_type(attrs: &HashMap<String, serde_json::Value>, name: &str) -> EventType {
    if let Some(raw) = attrs.get("honeyhive_event_type_raw").and_then(|v| v.as_str()) {
        if let Some(t) = parse_event_type(raw) {
            return t;
        }
    }
    if let Some(raw) = attrs.get("honeyhive.event_type").and_then(|v| v.as_str()) {
        if let Some(t) = parse_event_type(raw) {
            return t;
        }
    }
    EventType::infer_from_name(name)
}

fn parse_event_type(raw: &str) -> Option<EventType> {
    match raw.to_ascii_lowercase().as_str() {
        "model" => Some(EventType::Model),
        "chain" => Some(EventType::Chain),
        "tool" => Some(EventType::Tool),
        "session" => Some(EventType::Session),
        _ => None,
    }
}

fn parent_event_id(span: &SpanData) -> Option<honeytrace_core::EventId> {
    let parent = span.parent_span_id;
    if parent == SpanId::INVALID {
        None
    } else {
        Some(honeytrace_core::EventId::from_uuid(span_id_to_uuid(parent)))
    }
}

fn span_id_to_uuid(id: SpanId) -> uuid::Uuid {
    let bytes = id.to_bytes();
    let mut full = [0u8; 16];
    full[8..].copy_from_slice(&bytes);
    uuid::Uuid::from_bytes(full)
}

fn system_time_to_millis(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0)
}

fn value_to_json(value: &opentelemetry::Value) -> serde_json::Value {
    match value {
        opentelemetry::Value::Bool(b) => serde_json::json!(*b),
        opentelemetry::Value::I64(i) => serde_json::json!(*i),
        opentelemetry::Value::F64(f) => serde_json::json!(*f),
        opentelemetry::Value::String(s) => serde_json::json!(s.as_str()),
        other => serde_json::json!(other.to_string()),
    }
}

impl OtelSpanProcessor for HoneytraceSpanProcessor {
    fn on_start(&self, span: &mut SdkSpan, cx: &OtelContext) {
        let result = catch_unwind(AssertUnwindSafe(|| self.on_start_impl(span, cx)));
        if result.is_err() {
            self.logger.error("panic caught in on_start, span continues unenriched");
        }
    }

    fn on_end(&self, span: SpanData) {
        let result = catch_unwind(AssertUnwindSafe(|| self.on_end_impl(span)));
        if result.is_err() {
            self.metrics.spans_dropped.fetch_add(1, Ordering::Relaxed);
            self.export_metrics.dropped.fetch_add(1, Ordering::Relaxed);
            self.logger.error("panic caught in on_end, span dropped");
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> TraceResult<()> {
        Ok(())
    }
}
