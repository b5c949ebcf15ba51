//! Configuration resolution.
//!
//! Produces an immutable [`TracerConfig`] from three layered sources:
//! explicit constructor arguments (highest precedence), environment
//! variables (`HH_*`, see the table in the crate-level docs), and
//! defaults (lowest). The resolver never reads the environment again
//! after [`TracerConfigResolver::resolve`] returns, so a [`TracerConfig`]
//! is deterministic for the lifetime of the instance that owns it.

use honeytrace_core::ConfigError;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Explicit, caller-supplied options. Every field is optional; absent
/// fields fall through to the environment, then to defaults.
#[derive(Debug, Clone, Default)]
pub struct TracerOptions {
    pub api_key: Option<String>,
    pub project: Option<String>,
    pub source: Option<String>,
    pub server_url: Option<String>,
    pub session_name: Option<String>,
    pub session_id: Option<Uuid>,
    pub verbose: Option<bool>,
    pub test_mode: Option<bool>,
    pub disable_batch: Option<bool>,
    pub disable_http_tracing: Option<bool>,
    pub otlp_enabled: Option<bool>,
    pub cache_enabled: Option<bool>,
    pub cache_max_size: Option<usize>,
    pub cache_ttl: Option<Duration>,
    pub batch_size: Option<usize>,
    pub flush_interval: Option<Duration>,
    pub high_concurrency: Option<bool>,
}

/// Environment-aware lock/flush timeout profile, selected once at
/// resolve time from environment markers (serverless function
/// variables, container-orchestrator variables, or an explicit
/// high-concurrency flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutProfile {
    Serverless,
    ContainerOrchestrated,
    HighConcurrency,
    Standard,
}

impl TimeoutProfile {
    pub fn detect(env: &HashMap<String, String>) -> Self {
        if truthy(env, "HH_HIGH_CONCURRENCY") {
            return TimeoutProfile::HighConcurrency;
        }
        if env.contains_key("AWS_LAMBDA_FUNCTION_NAME")
            || env.contains_key("FUNCTIONS_WORKER_RUNTIME")
            || env.contains_key("K_SERVICE")
        {
            return TimeoutProfile::Serverless;
        }
        if env.contains_key("KUBERNETES_SERVICE_HOST") || env.contains_key("ECS_CONTAINER_METADATA_URI") {
            return TimeoutProfile::ContainerOrchestrated;
        }
        TimeoutProfile::Standard
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        match self {
            TimeoutProfile::Serverless => Duration::from_millis(500),
            TimeoutProfile::ContainerOrchestrated => Duration::from_secs(2),
            TimeoutProfile::HighConcurrency => Duration::from_millis(300),
            TimeoutProfile::Standard => Duration::from_secs(1),
        }
    }

    pub fn flush_timeout(&self) -> Duration {
        match self {
            TimeoutProfile::Serverless => Duration::from_secs(2),
            TimeoutProfile::ContainerOrchestrated => Duration::from_secs(5),
            TimeoutProfile::HighConcurrency => Duration::from_secs(1),
            TimeoutProfile::Standard => Duration::from_secs(3),
        }
    }
}

/// Fully resolved, immutable per-instance configuration. Constructed
/// only via [`TracerConfigResolver::resolve`]; never mutated afterward.
#[derive(Debug, Clone)]
pub struct TracerConfig {
    pub api_key: Option<String>,
    pub project: Option<String>,
    pub source: String,
    pub server_url: String,
    pub session_name: String,
    pub session_id: Option<Uuid>,
    pub verbose: bool,
    pub test_mode: bool,
    pub disable_batch: bool,
    pub disable_http_tracing: bool,
    pub otlp_enabled: bool,
    pub cache_enabled: bool,
    pub cache_max_size: usize,
    pub cache_ttl: Duration,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub timeout_profile: TimeoutProfile,
}

const DEFAULT_SERVER_URL: &str = "https://api.honeytrace.dev";
const MAX_BATCH_SIZE: usize = 10_000;
const MAX_CACHE_SIZE: usize = 100_000;

/// Resolves a [`TracerConfig`] from explicit options and an environment
/// snapshot. The snapshot is an owned `HashMap` rather than a live read
/// of `std::env` so resolution is deterministic and testable without
/// mutating process-global state.
pub struct TracerConfigResolver;

impl TracerConfigResolver {
    pub fn resolve(
        explicit: TracerOptions,
        env: &HashMap<String, String>,
    ) -> Result<TracerConfig, ConfigError> {
        Self::resolve_with_logger(explicit, env, |_field, _msg| {})
    }

    /// Same as [`Self::resolve`] but invokes `warn` for every clamped
    /// out-of-range numeric value, so the caller can route the warning
    /// through its [`crate::logging::SafeLogger`].
    pub fn resolve_with_logger(
        explicit: TracerOptions,
        env: &HashMap<String, String>,
        mut warn: impl FnMut(&str, &str),
    ) -> Result<TracerConfig, ConfigError> {
        let test_mode = explicit
            .test_mode
            .or_else(|| parse_bool_env(env, "HH_TEST_MODE"))
            .transpose()
            .map_err(|reason| ConfigError::ParseError {
                field: "HH_TEST_MODE".to_string(),
                reason,
            })?
            .unwrap_or(false);

        let api_key = explicit.api_key.or_else(|| env.get("HH_API_KEY").cloned());
        let otlp_enabled = explicit
            .otlp_enabled
            .or_else(|| parse_bool_env(env, "HH_OTLP_ENABLED").and_then(Result::ok))
            .unwrap_or(true);

        // Disabling OTLP only changes the transport (spec: direct-client
        // path instead of OTLP/HTTP); it still authenticates with the
        // events API, so it does not exempt the api_key requirement.
        let requires_network = !test_mode;
        if requires_network && api_key.is_none() {
            return Err(ConfigError::MissingField("api_key".to_string()));
        }

        let source = explicit
            .source
            .or_else(|| env.get("HH_SOURCE").cloned())
            .unwrap_or_else(|| "dev".to_string());

        let server_url = explicit
            .server_url
            .or_else(|| env.get("HH_API_URL").cloned())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        url::Url::parse(&server_url).map_err(|e| ConfigError::InvalidValue {
            field: "server_url".to_string(),
            reason: e.to_string(),
        })?;

        let session_name = resolve_session_name(explicit.session_name.clone());

        let verbose = explicit
            .verbose
            .or_else(|| parse_bool_env(env, "HH_VERBOSE").and_then(Result::ok))
            .unwrap_or(false);

        let disable_batch = explicit
            .disable_batch
            .or_else(|| parse_bool_env(env, "HH_DISABLE_BATCH").and_then(Result::ok))
            .unwrap_or(false);

        let disable_http_tracing = explicit
            .disable_http_tracing
            .or_else(|| parse_bool_env(env, "HH_DISABLE_HTTP_TRACING").and_then(Result::ok))
            .unwrap_or(false);

        let cache_enabled = explicit
            .cache_enabled
            .or_else(|| parse_bool_env(env, "HH_CACHE_ENABLED").and_then(Result::ok))
            .unwrap_or(true);

        let cache_max_size = clamp_usize(
            explicit
                .cache_max_size
                .or_else(|| env.get("HH_CACHE_MAX_SIZE").and_then(|v| v.parse().ok()))
                .unwrap_or(1000),
            1,
            MAX_CACHE_SIZE,
            "cache_max_size",
            &mut warn,
        );

        let batch_size = clamp_usize(
            explicit
                .batch_size
                .or_else(|| env.get("HH_BATCH_SIZE").and_then(|v| v.parse().ok()))
                .unwrap_or(512),
            1,
            MAX_BATCH_SIZE,
            "batch_size",
            &mut warn,
        );

        let flush_interval = explicit.flush_interval.unwrap_or_else(|| {
            let secs = env
                .get("HH_FLUSH_INTERVAL")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(5.0);
            Duration::from_secs_f64(secs.max(0.1))
        });

        let high_concurrency = explicit
            .high_concurrency
            .or_else(|| parse_bool_env(env, "HH_HIGH_CONCURRENCY").and_then(Result::ok))
            .unwrap_or(false);

        let mut profile_env = env.clone();
        if high_concurrency {
            profile_env.insert("HH_HIGH_CONCURRENCY".to_string(), "true".to_string());
        }
        let timeout_profile = TimeoutProfile::detect(&profile_env);

        Ok(TracerConfig {
            api_key,
            project: explicit.project.or_else(|| env.get("HH_PROJECT").cloned()),
            source,
            server_url,
            session_name,
            session_id: explicit.session_id,
            verbose,
            test_mode,
            disable_batch,
            disable_http_tracing,
            otlp_enabled,
            cache_enabled,
            cache_max_size: cache_max_size as usize,
            cache_ttl: explicit.cache_ttl.unwrap_or_else(|| Duration::from_secs(900)),
            batch_size: batch_size as usize,
            flush_interval,
            timeout_profile,
        })
    }
}

fn truthy(env: &HashMap<String, String>, key: &str) -> bool {
    env.get(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn parse_bool_env(env: &HashMap<String, String>, key: &str) -> Option<Result<bool, String>> {
    env.get(key).map(|raw| match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    })
}

fn clamp_usize(
    value: usize,
    min: usize,
    max: usize,
    field: &str,
    warn: &mut impl FnMut(&str, &str),
) -> usize {
    if value < min {
        warn(field, &format!("{value} below minimum {min}, clamping"));
        min
    } else if value > max {
        warn(field, &format!("{value} above maximum {max}, clamping"));
        max
    } else {
        value
    }
}

/// `session_name` resolution priority: explicit > invoking binary's file
/// stem (best-effort) > a fresh UUID string.
fn resolve_session_name(explicit: Option<String>) -> String {
    if let Some(name) = explicit {
        return name;
    }
    if let Some(name) = std::env::current_exe()
        .ok()
        .and_then(|p| Path::new(&p).file_stem().map(|s| s.to_string_lossy().into_owned()))
    {
        if !name.is_empty() {
            return name;
        }
    }
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn resolves_from_explicit_over_env_over_default() {
        let explicit = TracerOptions {
            api_key: Some("explicit-key".into()),
            test_mode: Some(true),
            ..Default::default()
        };
        let env = env(&[("HH_API_KEY", "env-key"), ("HH_SOURCE", "staging")]);
        let config = TracerConfigResolver::resolve(explicit, &env).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("explicit-key"));
        assert_eq!(config.source, "staging");
    }

    #[test]
    fn source_defaults_to_dev() {
        let config = TracerConfigResolver::resolve(
            TracerOptions { test_mode: Some(true), ..Default::default() },
            &HashMap::new(),
        )
        .unwrap();
        assert_eq!(config.source, "dev");
    }

    #[test]
    fn missing_api_key_is_fatal_when_network_required() {
        let err = TracerConfigResolver::resolve(TracerOptions::default(), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "api_key"));
    }

    #[test]
    fn missing_api_key_is_fatal_even_when_otlp_disabled() {
        let explicit = TracerOptions { otlp_enabled: Some(false), ..Default::default() };
        let err = TracerConfigResolver::resolve(explicit, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "api_key"));
    }

    #[test]
    fn missing_api_key_is_fine_in_test_mode() {
        let config = TracerConfigResolver::resolve(
            TracerOptions { test_mode: Some(true), ..Default::default() },
            &HashMap::new(),
        )
        .unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn malformed_server_url_is_fatal() {
        let explicit = TracerOptions {
            test_mode: Some(true),
            server_url: Some("not a url".into()),
            ..Default::default()
        };
        let err = TracerConfigResolver::resolve(explicit, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "server_url"));
    }

    #[test]
    fn unparseable_bool_is_fatal() {
        let env = env(&[("HH_TEST_MODE", "maybe")]);
        let err = TracerConfigResolver::resolve(TracerOptions::default(), &env).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn out_of_range_numeric_is_clamped_not_fatal() {
        let mut warnings = Vec::new();
        let explicit = TracerOptions {
            test_mode: Some(true),
            batch_size: Some(0),
            ..Default::default()
        };
        let config = TracerConfigResolver::resolve_with_logger(explicit, &HashMap::new(), |field, msg| {
            warnings.push((field.to_string(), msg.to_string()));
        })
        .unwrap();
        assert_eq!(config.batch_size, 1);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn session_name_falls_back_to_uuid_shaped_string() {
        let config = TracerConfigResolver::resolve(
            TracerOptions { test_mode: Some(true), ..Default::default() },
            &HashMap::new(),
        )
        .unwrap();
        assert!(!config.session_name.is_empty());
    }

    #[test]
    fn serverless_marker_selects_serverless_profile() {
        let env = env(&[("AWS_LAMBDA_FUNCTION_NAME", "my-fn")]);
        assert_eq!(TimeoutProfile::detect(&env), TimeoutProfile::Serverless);
    }

    #[test]
    fn high_concurrency_flag_takes_priority_over_serverless_marker() {
        let env = env(&[
            ("AWS_LAMBDA_FUNCTION_NAME", "my-fn"),
            ("HH_HIGH_CONCURRENCY", "true"),
        ]);
        assert_eq!(TimeoutProfile::detect(&env), TimeoutProfile::HighConcurrency);
    }

    #[test]
    fn resolver_is_deterministic_given_same_inputs() {
        let env = env(&[("HH_API_KEY", "k"), ("HH_PROJECT", "p")]);
        let a = TracerConfigResolver::resolve(TracerOptions::default(), &env).unwrap();
        let b = TracerConfigResolver::resolve(TracerOptions::default(), &env).unwrap();
        assert_eq!(a.project, b.project);
        assert_eq!(a.source, b.source);
    }
}
