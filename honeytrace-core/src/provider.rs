use serde::{Deserialize, Serialize};

/// Classification of whatever tracer provider (if any) is already
/// installed in the host process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderKind {
    /// No real provider: the OTel no-op default.
    NoOp,
    /// A proxy/wrapper provider with no real backing processor.
    Proxy,
    /// A genuine `TracerProvider` implementation.
    TracerProvider,
    /// Anything else; treated as functioning until proven otherwise.
    Custom,
}

/// The three mutually exclusive ways a tracer instance can attach itself
/// to OpenTelemetry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IntegrationStrategy {
    /// No functioning provider was found; this instance installed one
    /// globally.
    MainProvider,
    /// A functioning provider already existed; this instance created an
    /// isolated provider of its own rather than touching the global one.
    SecondaryProvider,
    /// Processor attachment failed under both other strategies; this
    /// instance fell back to an isolated provider with a console
    /// exporter.
    ConsoleFallback,
}

/// The result of inspecting the host's current tracer provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderInfo {
    pub class_name: String,
    pub kind: ProviderKind,
    pub is_functioning: bool,
    pub supports_span_processors: bool,
    pub integration_strategy: IntegrationStrategy,
}

impl ProviderInfo {
    pub fn none_detected() -> Self {
        Self {
            class_name: "NoopTracerProvider".to_string(),
            kind: ProviderKind::NoOp,
            is_functioning: false,
            supports_span_processors: false,
            integration_strategy: IntegrationStrategy::MainProvider,
        }
    }
}
