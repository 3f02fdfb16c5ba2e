//! Integration tests for the Prometheus exporter.
//!
//! These tests verify the full flow from routing MQTT messages to exposing
//! them via the HTTP snapshot endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use zigbee_exporter_prometheus::{
    ExporterConfig, HttpServer, MessageRouter, MetricSet, RouteOutcome, SharedMetricSet,
};

/// Helper to create a metric set and a router with default config.
fn create_pipeline() -> (MessageRouter, SharedMetricSet) {
    let config = ExporterConfig::default();
    let metrics = Arc::new(MetricSet::default());
    let router = MessageRouter::new(metrics.clone(), config.mqtt.topic_prefix);
    (router, metrics)
}

/// Helper to parse a sample line into (metric, identity, value).
fn parse_sample(line: &str) -> Option<(&str, &str, f64)> {
    if line.starts_with('#') || line.trim().is_empty() {
        return None;
    }

    let (series, value) = line.rsplit_once(' ')?;
    let (metric, labels) = series.split_once('{')?;
    let identity = labels.strip_prefix("name=\"")?.strip_suffix("\"}")?;
    Some((metric, identity, value.parse().ok()?))
}

fn samples(output: &str) -> Vec<(String, String, f64)> {
    output
        .lines()
        .filter_map(parse_sample)
        .map(|(m, i, v)| (m.to_string(), i.to_string(), v))
        .collect()
}

#[tokio::test]
async fn test_kitchen_example() {
    let (router, metrics) = create_pipeline();

    router.route("zigbee2mqtt/Kitchen", br#"{"power": 42, "state": "ON"}"#);
    let output = metrics.render().unwrap();

    assert!(output.contains("zigbee_watt{name=\"Kitchen\"} 42\n"));
    assert!(output.contains("zigbee_state{name=\"Kitchen\"} 1\n"));

    router.route("zigbee2mqtt/Kitchen", br#"{"power": 0}"#);
    let output = metrics.render().unwrap();
    assert!(
        output.contains("zigbee_watt{name=\"Kitchen\"} 42\n"),
        "Zero power must not overwrite the last reading. Output: {}",
        output
    );

    let before = samples(&output);
    assert_eq!(
        router.route("other/Kitchen", br#"{"power": 99}"#),
        RouteOutcome::Unhandled
    );
    assert_eq!(samples(&metrics.render().unwrap()), before);
}

#[tokio::test]
async fn test_only_recognised_series_rendered() {
    let (router, metrics) = create_pipeline();

    router.route(
        "zigbee2mqtt/Air Meter",
        br#"{"temperature": 22.3, "humidity": 51, "co2": 640, "voc": 120,
             "formaldehyd": 0.03, "pm25": 4, "linkquality": 142, "battery": 88}"#,
    );

    let found = samples(&metrics.render().unwrap());
    let mut names: Vec<_> = found.iter().map(|(m, _, _)| m.as_str()).collect();
    names.sort();

    assert_eq!(
        names,
        vec![
            "zigbee_co2",
            "zigbee_formaldehyde",
            "zigbee_humidity",
            "zigbee_link",
            "zigbee_pm25",
            "zigbee_temp",
            "zigbee_voc",
        ]
    );
    assert!(found.iter().all(|(_, identity, _)| identity == "Air Meter"));
}

#[tokio::test]
async fn test_malformed_then_valid() {
    let (router, metrics) = create_pipeline();

    assert_eq!(
        router.route("zigbee2mqtt/Gang", b"\x00\x01 garbage"),
        RouteOutcome::Malformed
    );
    router.route("zigbee2mqtt/Gang", br#"{"linkquality": 60}"#);

    let found = samples(&metrics.render().unwrap());
    assert_eq!(
        found,
        vec![("zigbee_link".to_string(), "Gang".to_string(), 60.0)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingestion() {
    let (router, metrics) = create_pipeline();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let router = router.clone();
            tokio::spawn(async move {
                for j in 1..=50 {
                    let payload = format!(r#"{{"power": {}, "voltage": 230}}"#, i * 1000 + j);
                    router.route(&format!("zigbee2mqtt/device{:02}", i), payload.as_bytes());
                }
            })
        })
        .collect();

    // Scrape while ingestion is in flight
    let scraper = {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                assert!(metrics.render().is_ok());
                tokio::task::yield_now().await;
            }
        })
    };

    for handle in handles {
        handle.await.unwrap();
    }
    scraper.await.unwrap();

    let found = samples(&metrics.render().unwrap());
    for i in 0..16 {
        let identity = format!("device{:02}", i);
        let watt = found
            .iter()
            .find(|(m, id, _)| m == "zigbee_watt" && *id == identity)
            .map(|(_, _, v)| *v);
        assert_eq!(watt, Some((i * 1000 + 50) as f64), "{}", identity);
    }

    let stats = metrics.stats();
    assert_eq!(stats.messages_received, 16 * 50);
    assert_eq!(stats.messages_applied, 16 * 50);
    assert_eq!(metrics.series_count(), 32);
}

#[tokio::test]
async fn test_http_server_serves_snapshot() {
    let (router, metrics) = create_pipeline();
    router.route(
        "zigbee2mqtt/Servers",
        br#"{"power": 135.2, "energy": 412.75, "state": "ON"}"#,
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let config = ExporterConfig::default();
    let server = HttpServer::new(
        metrics.clone(),
        addr,
        config.prometheus.path.clone(),
        config.prometheus.render_timeout(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.serve(listener, shutdown_rx));

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/prometheus", addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );

    let body = response.text().await.unwrap();
    assert!(body.contains("zigbee_watt{name=\"Servers\"} 135.2\n"));
    assert!(body.contains("zigbee_energy{name=\"Servers\"} 412.75\n"));
    assert!(body.contains("zigbee_state{name=\"Servers\"} 1\n"));

    // Ingest continues between scrapes
    router.route("zigbee2mqtt/Servers", br#"{"state": "OFF"}"#);
    let body = client
        .get(format!("http://{}/prometheus", addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("zigbee_state{name=\"Servers\"} 0\n"));

    let ready = client
        .get(format!("http://{}/ready", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(ready.status(), 200);

    drop(client);
    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server should stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_empty_render() {
    let (_, metrics) = create_pipeline();

    let output = metrics.render().unwrap();

    // Only HELP/TYPE comments and the exporter's own statistics
    assert!(
        output.lines().all(|l| {
            l.starts_with('#') || l.trim().is_empty() || l.starts_with("zigbee_exporter_")
        }),
        "Output should only contain comments, empty lines, or exporter stats. Got: {}",
        output
    );
}
