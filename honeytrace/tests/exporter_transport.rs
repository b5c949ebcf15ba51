// Exercises the events-API transport (`Exporter::Client`) against a real
// HTTP server, rather than asserting on internals: a span closed while a
// tracer is configured with `otlp_enabled: false` must produce one POST
// to `{server_url}/events` carrying the canonical event shape.

use honeytrace::config::TracerOptions;
use honeytrace::tracer::TracerInstance;
use opentelemetry::trace::Tracer as _;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn closed_span_is_posted_to_the_events_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let env = HashMap::new();
    let tracer = TracerInstance::init(
        TracerOptions {
            test_mode: Some(false),
            otlp_enabled: Some(false),
            api_key: Some("test-key".into()),
            server_url: Some(server.uri()),
            project: Some("demo".into()),
            ..Default::default()
        },
        &env,
    )
    .unwrap();

    let otel_tracer = tracer.get_tracer("transport-test");
    otel_tracer.in_span("http-call", |_cx| {});

    assert!(tracer.flush(Some(Duration::from_secs(2))).await);
    assert_eq!(tracer.processed_span_count(), 1);
    assert_eq!(tracer.dropped_span_count(), 0);

    server.verify().await;
    tracer.shutdown().await;
}
