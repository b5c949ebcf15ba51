//! Construction of the real OTLP/HTTP span exporter.
//!
//! Building the exporter is the only genuinely fallible step in the
//! OTLP transport path (bad endpoint, TLS setup failure), so it is kept
//! isolated here behind `anyhow` and converted to a
//! [`honeytrace_core::ProviderError`] at the call site in `tracer.rs`.

use anyhow::Context as _;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::export::trace::SpanExporter as OtelSpanExporter;
use std::collections::HashMap;
use std::time::Duration;

/// Builds an OTLP/HTTP span exporter pointed at `{server_url}/v1/traces`,
/// authenticated with a bearer token built from `api_key`.
pub fn build_otlp_exporter(
    server_url: &str,
    api_key: &str,
    timeout: Duration,
) -> anyhow::Result<Box<dyn OtelSpanExporter>> {
    let endpoint = format!("{}/v1/traces", server_url.trim_end_matches('/'));

    let mut headers = HashMap::new();
    headers.insert("authorization".to_string(), format!("Bearer {api_key}"));

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(&endpoint)
        .with_headers(headers)
        .with_timeout(timeout)
        .build()
        .context("failed to build OTLP/HTTP span exporter")?;

    Ok(Box::new(exporter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_without_error_for_a_well_formed_endpoint() {
        let result = build_otlp_exporter("https://api.honeytrace.dev", "key", Duration::from_secs(5));
        assert!(result.is_ok());
    }
}
