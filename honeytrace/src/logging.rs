//! Structured logging with graceful degradation.
//!
//! `safe_log` must never raise: under any failure of the tracing
//! dispatcher it falls back to a direct `stderr` write, and if that also
//! fails it swallows the error silently rather than let a logging call
//! take down the host application. Loggers are per-instance (named by
//! `tracer_id`) or global (`owner = None`); there is no shared mutable
//! logger state.

use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Severity levels mirrored from `tracing`'s, kept as our own enum so
/// `safe_log` callers don't need to depend on `tracing::Level` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Per-instance structured logger. Holds no lock and no shared state;
/// cloning is cheap (it is just a target string and a level).
#[derive(Debug, Clone)]
pub struct SafeLogger {
    target: String,
    level: LogLevel,
}

impl SafeLogger {
    /// A logger scoped to one tracer instance, logging under
    /// `honeytrace::instance::{tracer_id}` so it can be filtered
    /// independently via `tracing_subscriber::EnvFilter`.
    pub fn for_instance(tracer_id: &str, verbose: bool) -> Self {
        Self {
            target: format!("honeytrace::instance::{tracer_id}"),
            level: if verbose { LogLevel::Debug } else { LogLevel::Info },
        }
    }

    /// The global fallback logger (no owning instance).
    pub fn global(verbose: bool) -> Self {
        Self {
            target: "honeytrace".to_string(),
            level: if verbose { LogLevel::Debug } else { LogLevel::Info },
        }
    }

    /// Raise or lower the effective level after construction (mirrors
    /// the `verbose` flag being updatable post-init).
    pub fn set_verbose(&mut self, verbose: bool) {
        self.level = if verbose { LogLevel::Debug } else { LogLevel::Info };
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Logs `message` at `level`, attaching `data` as a structured
    /// `honeyhive_data` field. Never panics or returns an error: this is
    /// the Rust analogue of "never raises".
    pub fn safe_log(&self, level: LogLevel, message: &str, data: Option<&serde_json::Value>) {
        if level < self.level {
            return;
        }

        let dispatched = catch_unwind(AssertUnwindSafe(|| {
            self.dispatch(level, message, data);
        }));

        if dispatched.is_err() {
            self.fallback_write(level, message);
        }
    }

    pub fn debug(&self, message: &str) {
        self.safe_log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: &str) {
        self.safe_log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.safe_log(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: &str) {
        self.safe_log(LogLevel::Error, message, None);
    }

    fn dispatch(&self, level: LogLevel, message: &str, data: Option<&serde_json::Value>) {
        let target = self.target.as_str();
        match (level, data) {
            (LogLevel::Debug, Some(d)) => tracing::debug!(target: "honeytrace", honeytrace.target = target, honeyhive_data = %d, "{message}"),
            (LogLevel::Debug, None) => tracing::debug!(target: "honeytrace", honeytrace.target = target, "{message}"),
            (LogLevel::Info, Some(d)) => tracing::info!(target: "honeytrace", honeytrace.target = target, honeyhive_data = %d, "{message}"),
            (LogLevel::Info, None) => tracing::info!(target: "honeytrace", honeytrace.target = target, "{message}"),
            (LogLevel::Warn, Some(d)) => tracing::warn!(target: "honeytrace", honeytrace.target = target, honeyhive_data = %d, "{message}"),
            (LogLevel::Warn, None) => tracing::warn!(target: "honeytrace", honeytrace.target = target, "{message}"),
            (LogLevel::Error, Some(d)) => tracing::error!(target: "honeytrace", honeytrace.target = target, honeyhive_data = %d, "{message}"),
            (LogLevel::Error, None) => tracing::error!(target: "honeytrace", honeytrace.target = target, "{message}"),
        }
    }

    /// Last-resort path when the tracing dispatcher itself panicked
    /// (e.g. a subscriber misbehaving during process shutdown). Writes
    /// directly to stderr and swallows any further failure (such as a
    /// closed stream late in shutdown).
    fn fallback_write(&self, level: LogLevel, message: &str) {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            let mut stderr = std::io::stderr();
            let now = chrono::Utc::now().to_rfc3339();
            let _ = writeln!(stderr, "{now} [{:?}] {}: {}", level, self.target, message);
        }));
        // Any failure here, including a closed stream, is swallowed.
        let _ = attempt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_logger_is_scoped_by_tracer_id() {
        let logger = SafeLogger::for_instance("abc123", false);
        assert!(logger.target().contains("abc123"));
    }

    #[test]
    fn verbose_raises_level_to_debug() {
        let logger = SafeLogger::for_instance("t", true);
        assert_eq!(logger.level, LogLevel::Debug);
    }

    #[test]
    fn safe_log_never_panics_even_with_structured_data() {
        let logger = SafeLogger::global(true);
        let data = serde_json::json!({"tokens": 42});
        logger.safe_log(LogLevel::Warn, "degraded mode", Some(&data));
    }

    #[test]
    fn set_verbose_updates_level_after_construction() {
        let mut logger = SafeLogger::for_instance("t", false);
        assert_eq!(logger.level, LogLevel::Info);
        logger.set_verbose(true);
        assert_eq!(logger.level, LogLevel::Debug);
    }
}
