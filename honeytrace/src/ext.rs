//! Extension trait for attaching enrichment data to the currently
//! active span.
//!
//! `enrich_span` has no span handle of its own to operate on -- like
//! the rest of this crate it works through OTel's ambient context, so
//! the natural seat for its data is
//! [`opentelemetry::trace::get_active_span`]'s [`SpanRef`], not a
//! parameter threaded through every instrumented call. Values are
//! JSON-encoded into span attributes and read back out by
//! [`crate::processor::HoneytraceSpanProcessor::on_end_impl`] when the
//! span finishes.

use opentelemetry::trace::SpanRef;
use opentelemetry::KeyValue;
use serde_json::Value;

pub(crate) const METADATA_ATTR: &str = "honeyhive_metadata";
pub(crate) const METRICS_ATTR: &str = "honeyhive_metrics";
pub(crate) const FEEDBACK_ATTR: &str = "honeyhive_feedback";
pub(crate) const EVENT_ID_ATTR: &str = "honeyhive_event_id";
pub(crate) const EVENT_TYPE_ATTR: &str = "honeyhive_event_type_raw";

/// Extends an OpenTelemetry span reference with honeytrace's
/// enrichment attributes.
pub trait HoneytraceSpanExt {
    fn honeytrace_enrich(
        &self,
        metadata: Option<&Value>,
        metrics: Option<&Value>,
        feedback: Option<&Value>,
        event_type: Option<&str>,
        event_id: Option<&str>,
    );
}

impl HoneytraceSpanExt for SpanRef<'_> {
    fn honeytrace_enrich(
        &self,
        metadata: Option<&Value>,
        metrics: Option<&Value>,
        feedback: Option<&Value>,
        event_type: Option<&str>,
        event_id: Option<&str>,
    ) {
        if let Some(metadata) = metadata {
            self.set_attribute(KeyValue::new(METADATA_ATTR, metadata.to_string()));
        }
        if let Some(metrics) = metrics {
            self.set_attribute(KeyValue::new(METRICS_ATTR, metrics.to_string()));
        }
        if let Some(feedback) = feedback {
            self.set_attribute(KeyValue::new(FEEDBACK_ATTR, feedback.to_string()));
        }
        if let Some(event_type) = event_type {
            self.set_attribute(KeyValue::new(EVENT_TYPE_ATTR, event_type.to_string()));
        }
        if let Some(event_id) = event_id {
            self.set_attribute(KeyValue::new(EVENT_ID_ATTR, event_id.to_string()));
        }
    }
}
