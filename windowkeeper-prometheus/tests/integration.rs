use prometheus::Registry;
use std::time::Duration;
use tower_service::Service;
use windowkeeper::store::InMemoryWindowStore;
use windowkeeper::telemetry::LimiterEvent;
use windowkeeper::{LimitConfig, LimiterEngine, ManualClock, WindowKey};
use windowkeeper_prometheus::{PrometheusSink, EVENTS_TOTAL};

fn get_counter_value(registry: &Registry, event_type: &str) -> f64 {
    let metric_families = registry.gather();
    let events_metric = metric_families.iter().find(|mf| mf.get_name() == EVENTS_TOTAL);

    if let Some(metric) = events_metric {
        if let Some(m) = metric.get_metric().iter().find(|m| {
            m.get_label().iter().any(|l| l.get_name() == "event" && l.get_value() == event_type)
        }) {
            if let Some(c) = m.get_counter().as_ref() {
                return c.value();
            }
        }
    }
    0.0
}

#[tokio::test]
async fn each_event_kind_has_its_own_series() {
    let registry = Registry::new();
    let mut sink = PrometheusSink::new(registry.clone()).expect("Failed to create PrometheusSink");

    let cases = [
        (
            LimiterEvent::WindowOpened { key: "s:k".into(), limit: 2, ttl: Duration::from_secs(1) },
            "window_opened",
        ),
        (LimiterEvent::Admitted { key: "s:k".into(), limit: 2, remaining: 0 }, "admitted"),
        (LimiterEvent::Rejected { key: "s:k".into(), limit: 2, reset_at_millis: 1_000 }, "rejected"),
        (LimiterEvent::StoreFailed { key: "s:k".into(), error: "down".into() }, "store_failed"),
    ];

    for (event, label) in cases {
        sink.call(event).await.expect("Failed to call sink");
        assert_eq!(get_counter_value(&registry, label), 1.0);
    }
}

#[tokio::test]
async fn engine_decisions_are_counted() {
    let registry = Registry::new();
    let sink = PrometheusSink::new(registry.clone()).expect("Failed to create PrometheusSink");
    let clock = ManualClock::starting_at(1_000_000);
    let engine = LimiterEngine::new(InMemoryWindowStore::with_clock(clock.clone()))
        .with_clock(clock)
        .with_sink(sink);
    let config = LimitConfig::new(2, Duration::from_secs(60)).unwrap();
    let key = WindowKey::new("metrics", "GET:/:1.2.3.4");

    for _ in 0..5 {
        engine.decide(&key, &config).await.unwrap();
    }

    assert_eq!(get_counter_value(&registry, "window_opened"), 1.0);
    assert_eq!(get_counter_value(&registry, "admitted"), 1.0);
    assert_eq!(get_counter_value(&registry, "rejected"), 3.0);
}

#[test]
fn double_registration_is_an_error() {
    let registry = Registry::new();
    let _first = PrometheusSink::new(registry.clone()).unwrap();
    assert!(PrometheusSink::new(registry).is_err());
}
