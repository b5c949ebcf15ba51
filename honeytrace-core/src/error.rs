use thiserror::Error;

/// Configuration resolution failures. Fatal at tracer construction time.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("could not parse {field}: {reason}")]
    ParseError { field: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Provider-strategy integration failures. Fatal only when every fallback
/// strategy has also failed.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("failed to attach span processor: {0}")]
    AttachmentFailed(String),

    #[error("no viable provider strategy succeeded: {0}")]
    AllStrategiesFailed(String),
}

/// Translation DSL failures. Always non-fatal to the host; callers fall
/// back to a pass-through event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("no provider matched the attribute set")]
    UnknownProvider,

    #[error("required field missing in mapping: {0}")]
    MissingRequiredField(String),

    #[error("transform failed: {0}")]
    TransformFailed(String),
}

/// Transport-level failures. Retried per the active timeout profile, then
/// dropped with a metric increment. Never raised to the host.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("export timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Cache/lock resource failures. Never fatal; the caller degrades to a
/// cache miss or a lock-free path.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache '{0}' not found")]
    UnknownCache(String),

    #[error("lock timed out after {0:?}")]
    LockTimeout(std::time::Duration),
}

/// User-facing validation failures from explicit calls such as
/// `enrich_span` or `session_start`. The only error type that surfaces
/// back through a public API rather than degrading silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid UUID for {field}: {value}")]
    InvalidUuid { field: String, value: String },

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
pub type TranslationResult<T> = std::result::Result<T, TranslationError>;
pub type TransportResult<T> = std::result::Result<T, TransportError>;
pub type CacheResult<T> = std::result::Result<T, CacheError>;
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_messages_name_the_field() {
        let err = ConfigError::MissingField("api_key".to_string());
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn translation_error_is_comparable_for_fallback_logic() {
        assert_eq!(TranslationError::UnknownProvider, TranslationError::UnknownProvider);
    }
}
