//! Per-instance context and baggage propagation.
//!
//! Baggage is a map of string keys to string values, owned exclusively
//! by one [`crate::tracer::TracerInstance`]. It never crosses instance
//! boundaries and is never stored in any process-global location. Reads
//! do not block; writes serialize through the instance's baggage lock
//! with a per-environment timeout.
//!
//! Per-span enrichment data (see [`crate::tracer::TracerInstance::enrich_span`])
//! does not live here: it rides on the span itself via
//! [`crate::ext::HoneytraceSpanExt`], since it applies to one span
//! rather than flowing forward as context.

use honeytrace_core::{SessionId, ValidationError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;

/// Keys the system reserves for itself. User code may overwrite these
/// only via [`BaggageStore::session_start`], never remove them.
pub const RESERVED_KEYS: &[&str] = &["session_id", "project", "source"];

#[derive(Debug, Default, Clone)]
struct BaggageState {
    values: HashMap<String, String>,
    session_started: bool,
}

/// Owns one tracer instance's baggage. Reads never block on the write
/// lock timing out; a write that cannot acquire the lock within the
/// configured timeout is logged by the caller and treated as a no-op
/// rather than causing the host to hang.
pub struct BaggageStore {
    state: RwLock<BaggageState>,
    write_timeout: Duration,
}

impl BaggageStore {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(BaggageState::default()),
            write_timeout,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.state.read().await.values.get(key).cloned()
    }

    /// Returns `false` (instead of hanging) when the baggage lock cannot
    /// be acquired within the configured timeout.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        match timeout(self.write_timeout, self.state.write()).await {
            Ok(mut guard) => {
                guard.values.insert(key, value);
                true
            }
            Err(_) => false,
        }
    }

    /// No-op (returns `false`) for a reserved key; user keys are removed
    /// normally.
    pub async fn remove(&self, key: &str) -> bool {
        if RESERVED_KEYS.contains(&key) {
            return false;
        }
        match timeout(self.write_timeout, self.state.write()).await {
            Ok(mut guard) => {
                guard.values.remove(key);
                true
            }
            Err(_) => false,
        }
    }

    /// Generates or accepts a session UUID and stores it under the
    /// `session_id` reserved key. Idempotent per instance: once a
    /// session is active, a call with no explicit `seed` returns the
    /// already-active id unchanged rather than minting a new one. An
    /// explicit `seed` always overrides, whether or not a session is
    /// already active.
    pub async fn session_start(&self, seed: Option<SessionId>) -> SessionId {
        let mut guard = self.state.write().await;

        if seed.is_none() && guard.session_started {
            if let Some(existing) = guard.values.get("session_id").and_then(|s| SessionId::parse(s).ok()) {
                return existing;
            }
        }

        let session_id = seed.unwrap_or_default();
        guard.values.insert("session_id".to_string(), session_id.to_string());
        guard.session_started = true;
        session_id
    }

    pub async fn session_end(&self) {
        let mut guard = self.state.write().await;
        guard.values.remove("session_id");
        guard.session_started = false;
    }

    pub async fn is_session_started(&self) -> bool {
        self.state.read().await.session_started
    }

    pub async fn set_reserved(&self, key: &'static str, value: impl Into<String>) {
        debug_assert!(RESERVED_KEYS.contains(&key));
        let mut guard = self.state.write().await;
        guard.values.insert(key.to_string(), value.into());
    }

    /// Snapshots the baggage as an owned map, e.g. for stamping onto a
    /// span as attributes.
    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.state.read().await.values.clone()
    }

    /// Serializes baggage onto a carrier using the stable
    /// `baggage: k1=v1,k2=v2` format, percent-encoding values that
    /// contain `,` or `;`.
    pub async fn inject(&self, carrier: &mut HashMap<String, String>) {
        let guard = self.state.read().await;
        if guard.values.is_empty() {
            return;
        }
        let encoded = guard
            .values
            .iter()
            .map(|(k, v)| format!("{k}={}", percent_encode(v)))
            .collect::<Vec<_>>()
            .join(",");
        carrier.insert("baggage".to_string(), encoded);
    }

    /// Parses the inverse of [`Self::inject`], replacing this store's
    /// values with the carrier's contents.
    pub async fn extract(&self, carrier: &HashMap<String, String>) {
        let Some(header) = carrier.get("baggage") else { return };
        let mut parsed = HashMap::new();
        for pair in header.split(',') {
            if let Some((k, v)) = pair.split_once('=') {
                parsed.insert(k.trim().to_string(), percent_decode(v.trim()));
            }
        }
        let mut guard = self.state.write().await;
        guard.values = parsed;
    }
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            ',' => out.push_str("%2C"),
            ';' => out.push_str("%3B"),
            '%' => out.push_str("%25"),
            other => out.push(other),
        }
    }
    out
}

fn percent_decode(value: &str) -> String {
    value.replace("%2C", ",").replace("%3B", ";").replace("%25", "%")
}

/// Validates a user-supplied `event_id` string for `enrich_span`,
/// surfacing a [`ValidationError`] instead of panicking -- this is one
/// of only two paths the spec allows to return an error to the caller
/// directly.
pub fn validate_event_id(raw: &str) -> Result<uuid::Uuid, ValidationError> {
    uuid::Uuid::parse_str(raw).map_err(|_| ValidationError::InvalidUuid {
        field: "event_id".to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_remove_then_get_is_none() {
        let store = BaggageStore::new(Duration::from_secs(1));
        store.set("k", "v").await;
        store.remove("k").await;
        assert!(store.get("k").await.is_none());
    }

    #[tokio::test]
    async fn reserved_keys_cannot_be_removed() {
        let store = BaggageStore::new(Duration::from_secs(1));
        store.set_reserved("project", "demo").await;
        assert!(!store.remove("project").await);
        assert_eq!(store.get("project").await, Some("demo".to_string()));
    }

    #[tokio::test]
    async fn inject_then_extract_round_trips() {
        let store = BaggageStore::new(Duration::from_secs(1));
        store.set("a", "1").await;
        store.set("b", "two,three").await;

        let mut carrier = HashMap::new();
        store.inject(&mut carrier).await;

        let other = BaggageStore::new(Duration::from_secs(1));
        other.extract(&carrier).await;

        assert_eq!(other.snapshot().await, store.snapshot().await);
    }

    #[tokio::test]
    async fn session_start_is_idempotent_in_shape() {
        let store = BaggageStore::new(Duration::from_secs(1));
        let sid1 = store.session_start(None).await;
        assert!(store.is_session_started().await);
        let sid2 = store.session_start(Some(sid1)).await;
        assert_eq!(sid1, sid2);
    }

    #[tokio::test]
    async fn session_start_without_seed_reuses_active_session() {
        let store = BaggageStore::new(Duration::from_secs(1));
        let sid1 = store.session_start(None).await;
        let sid2 = store.session_start(None).await;
        assert_eq!(sid1, sid2);
    }

    #[tokio::test]
    async fn session_start_with_explicit_seed_overrides_active_session() {
        let store = BaggageStore::new(Duration::from_secs(1));
        store.session_start(None).await;
        let seeded = SessionId::new();
        let returned = store.session_start(Some(seeded)).await;
        assert_eq!(returned, seeded);
        assert_eq!(store.get("session_id").await, Some(seeded.to_string()));
    }

    #[test]
    fn validate_event_id_rejects_non_uuid() {
        assert!(validate_event_id("not-a-uuid").is_err());
    }

    #[test]
    fn validate_event_id_accepts_uuid() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(validate_event_id(&id.to_string()).unwrap(), id);
    }
}
