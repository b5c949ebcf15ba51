//! Client-side distributed tracing SDK for LLM-centric applications.
//!
//! Captures structured observability events from a host application,
//! enriches them with session/tenant context, translates heterogeneous
//! third-party instrumentation conventions into one canonical event
//! schema, and delivers them to a remote ingestion endpoint either via
//! a direct events API or OTLP/HTTP.
//!
//! The crate is not a global singleton: every [`tracer::TracerInstance`]
//! owns its own configuration, logger, caches, baggage, and (when not
//! coexisting with an existing provider) its own OpenTelemetry provider.

pub mod baggage;
pub mod cache;
pub mod config;
pub mod dsl;
pub mod export;
pub mod ext;
pub mod lifecycle;
pub mod logging;
pub mod otlp;
pub mod processor;
pub mod tracer;

pub use config::{TracerConfig, TracerConfigResolver, TracerOptions, TimeoutProfile};
pub use dsl::DslBundle;
pub use ext::HoneytraceSpanExt;
pub use logging::SafeLogger;
pub use tracer::TracerInstance;

pub use honeytrace_core::{
    CacheError, ConfigError, Event, EventId, EventType, IntegrationStrategy, ProviderError,
    ProviderInfo, ProviderKind, Section, SessionId, TranslationError, TransportError, ValidationError,
};
