use crate::ids::{EventId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discriminates the four kinds of canonical event this system emits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Model,
    Chain,
    Tool,
    Session,
}

impl EventType {
    /// Name-pattern inference used when no explicit event-type attribute
    /// is present. Order matters: the first matching pattern wins.
    pub fn infer_from_name(name: &str) -> EventType {
        let lower = name.to_ascii_lowercase();
        const MODEL_PATTERNS: &[&str] = &["openai", "gpt", "claude", "gemini", "chat", "completion"];
        const TOOL_PATTERNS: &[&str] = &["function", "tool", "api"];

        if MODEL_PATTERNS.iter().any(|p| lower.contains(p)) {
            EventType::Model
        } else if TOOL_PATTERNS.iter().any(|p| lower.contains(p)) {
            EventType::Tool
        } else {
            EventType::Tool
        }
    }
}

/// An open key-value section of a canonical event. Values may be scalars,
/// lists, or nested maps, so this is backed directly by `serde_json::Map`
/// rather than a concrete struct.
pub type Section = Map<String, Value>;

/// The canonical four-section event this system emits, regardless of
/// which third-party instrumentor originally produced the span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub event_name: String,
    pub event_type: EventType,
    pub source: String,
    pub session_id: SessionId,
    pub project: String,

    pub start_time: f64,
    pub end_time: Option<f64>,
    pub duration_ms: Option<f64>,

    pub parent_id: Option<EventId>,
    #[serde(default)]
    pub children_ids: Vec<EventId>,

    #[serde(default)]
    pub inputs: Section,
    #[serde(default)]
    pub outputs: Section,
    #[serde(default)]
    pub config: Section,
    #[serde(default)]
    pub metadata: Section,

    pub error: Option<String>,
    #[serde(default)]
    pub metrics: Section,
    #[serde(default)]
    pub feedback: Section,
    #[serde(default)]
    pub user_properties: Section,
}

impl Event {
    /// Builds an event with the required identifying fields and empty
    /// sections, ready for the span processor to fill in.
    pub fn new(
        event_name: impl Into<String>,
        event_type: EventType,
        source: impl Into<String>,
        session_id: SessionId,
        project: impl Into<String>,
        start_time: f64,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            event_name: event_name.into(),
            event_type,
            source: source.into(),
            session_id,
            project: project.into(),
            start_time,
            end_time: None,
            duration_ms: None,
            parent_id: None,
            children_ids: Vec::new(),
            inputs: Section::new(),
            outputs: Section::new(),
            config: Section::new(),
            metadata: Section::new(),
            error: None,
            metrics: Section::new(),
            feedback: Section::new(),
            user_properties: Section::new(),
        }
    }

    /// Closes out timing fields, computing `duration_ms` from the
    /// difference between `end_time` and `start_time`.
    pub fn finish(&mut self, end_time: f64) {
        self.end_time = Some(end_time);
        self.duration_ms = Some(end_time - self.start_time);
    }

    /// True when this event's timing invariant holds: `duration_ms` equals
    /// `end_time - start_time` within floating-point tolerance.
    pub fn duration_is_consistent(&self) -> bool {
        match (self.end_time, self.duration_ms) {
            (Some(end), Some(dur)) => (dur - (end - self.start_time)).abs() < 1e-6,
            (None, None) => true,
            _ => false,
        }
    }

    /// Human-readable RFC 3339 rendering of `start_time` for log lines;
    /// the wire format keeps the raw epoch-millis float.
    pub fn start_time_rfc3339(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.start_time as i64)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| self.start_time.to_string())
    }
}
