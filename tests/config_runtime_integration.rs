//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Configuration driven runtime start-up and metrics export."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::io::Write;
use std::time::Duration;

use edge_adapter::{ConnectionState, LifecycleState};
use edge_common::config::AppConfig;
use edge_metrics::{new_registry, spawn_http_server, MetricsNamespace, RuntimeMetrics};
use edge_runtime::{AdapterRuntimeRegistry, ChannelConsumer, RuntimeServices};
use serde_json::json;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const CONFIG: &str = r#"
[metrics]
prefix = "edge.protocol-adapter"

[runtime]
worker_pool_size = 2
sample_timeout_ms = 500

[adapters.boiler-room]
type = "simulation"
settings = { min_value = 10.0, max_value = 20.0, seed = 42 }

[[adapters.boiler-room.polling]]
tag = "temp"
interval_ms = 20

[adapters.feeder]
type = "modbus"
autostart = false
settings = { registers = { "1" = 230 } }

[[adapters.feeder.polling]]
tag = "feeder:holding:1"
interval_ms = 20
"#;

fn load_config() -> AppConfig {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    AppConfig::from_path(file.path()).unwrap()
}

fn build_registry(config: &AppConfig) -> (AdapterRuntimeRegistry, RuntimeMetrics) {
    let registry = new_registry();
    let runtime_metrics = RuntimeMetrics::new(registry.clone()).unwrap();
    let services = RuntimeServices::new(
        &config.runtime,
        registry,
        MetricsNamespace::new(config.metrics.prefix.clone()),
        Some(runtime_metrics.clone()),
    );
    let runtime = AdapterRuntimeRegistry::new(services);
    for (adapter_id, adapter) in &config.adapters {
        runtime.add_configured(adapter_id, adapter).unwrap();
    }
    (runtime, runtime_metrics)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within two seconds");
}

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn configured_adapters_start_poll_and_export_metrics() {
    let config = load_config();
    let (runtime, runtime_metrics) = build_registry(&config);
    assert_eq!(runtime.len(), 2);

    let (consumer, mut deliveries) = ChannelConsumer::channel("temp", 64);
    runtime.tags().add_consumer(consumer);

    let results = runtime.start_all().await;
    assert_eq!(results, vec![("boiler-room".to_owned(), true)]);
    assert_eq!(runtime.state("feeder").unwrap(), LifecycleState::Stopped);
    assert_eq!(
        runtime.connection_state("boiler-room").unwrap(),
        ConnectionState::Connected
    );

    let delivery = tokio::time::timeout(Duration::from_secs(2), deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    let value = delivery.points[0].value.as_f64().unwrap();
    assert!((10.0..=20.0).contains(&value), "value {value} out of range");

    let boiler = runtime.get("boiler-room").unwrap();
    eventually(|| boiler.metrics().value("read.publish.success.count") >= 2).await;
    assert_eq!(runtime_metrics.active_jobs(), 1);

    let server = spawn_http_server(runtime.services().metrics_registry(), "127.0.0.1:0".parse().unwrap()).unwrap();
    let response = http_get(server.addr(), "/metrics").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("edge_protocol_adapter_read_publish_success_count"));
    assert!(response.contains("adapter_id=\"boiler-room\""));
    assert!(response.contains("edge_adapters_total 2"));
    assert!(response.contains("edge_adapters_started 1"));

    let summaries = runtime.list_adapters();
    assert_eq!(summaries.len(), 2);
    assert_eq!(serde_json::to_value(&summaries[1]).unwrap()["state"], json!("Stopped"));

    let stopped = runtime.stop_all(true).await;
    assert!(stopped.iter().all(|(_, ok)| *ok));
    eventually(|| runtime_metrics.active_jobs() == 0).await;
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manual_start_reads_and_writes_modbus_registers() {
    let config = load_config();
    let (runtime, _metrics) = build_registry(&config);
    let (consumer, mut deliveries) = ChannelConsumer::channel("feeder:holding:1", 8);
    runtime.tags().add_consumer(consumer);

    assert!(runtime.write("feeder", "feeder:holding:1", json!(7)).await.is_err());
    assert!(runtime.start("feeder").await.unwrap());

    let first = tokio::time::timeout(Duration::from_secs(2), deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.points[0].value, json!(230));

    runtime
        .write("feeder", "feeder:holding:1", json!(231))
        .await
        .unwrap();
    let updated = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let delivery = deliveries.recv().await.unwrap();
            if delivery.points[0].value == json!(231) {
                return delivery;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(updated.tag_name, "feeder:holding:1");

    runtime.remove("feeder").await.unwrap();
    assert!(runtime.get("feeder").is_err());
    assert_eq!(runtime.len(), 1);
}
