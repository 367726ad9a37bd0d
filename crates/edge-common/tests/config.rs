//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the adapter runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

use edge_common::config::AppConfig;
use edge_common::LogFormat;
use tempfile::NamedTempFile;

const SAMPLE: &str = r#"
[logging]
format = "pretty"

[metrics]
enabled = false
prefix = "edge.protocol-adapter"

[runtime]
worker_pool_size = 4
sample_timeout_ms = 2500

[adapters.boiler-room]
type = "simulation"
settings = { min_value = 10.0, max_value = 20.0, seed = 7 }

[[adapters.boiler-room.polling]]
tag = "temp"
interval_ms = 250
min_delay_ms = 1
max_delay_ms = 3
destination = "plant/boiler/temp"
qos = 1
user_properties = [{ name = "site", value = "north" }]

[adapters.feeder]
type = "modbus"
autostart = false

[[adapters.feeder.polling]]
tag = "feeder:holding:1"
"#;

#[test]
fn parses_adapters_with_defaults() {
    let config = AppConfig::from_str(SAMPLE).unwrap();
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert!(!config.metrics.enabled);
    assert_eq!(config.runtime.worker_pool_size, 4);
    assert_eq!(config.runtime.sample_timeout, Duration::from_millis(2500));
    assert_eq!(config.runtime.event_capacity, 256);

    let ids: Vec<&str> = config.adapters.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["boiler-room", "feeder"]);

    let boiler = config.adapter("boiler-room").unwrap();
    assert_eq!(boiler.adapter_type, "simulation");
    assert!(boiler.autostart);
    assert_eq!(boiler.settings["seed"], serde_json::json!(7));
    let polling = &boiler.polling[0];
    assert_eq!(polling.interval, Duration::from_millis(250));
    assert_eq!((polling.min_delay_ms, polling.max_delay_ms), (1, 3));
    assert_eq!(polling.max_polling_errors_before_removal, 10);
    assert!(polling.include_timestamp);
    assert!(!polling.include_tag_names);
    assert_eq!(polling.user_properties[0].name, "site");

    let feeder = config.adapter("feeder").unwrap();
    assert!(!feeder.autostart);
    assert_eq!(feeder.polling[0].interval, Duration::from_millis(1000));
    assert_eq!(feeder.polling[0].qos, 0);
}

#[test]
fn rejects_inverted_delay_window() {
    let content = r#"
[adapters.a1]
type = "simulation"

[[adapters.a1.polling]]
tag = "temp"
min_delay_ms = 2
max_delay_ms = 1
"#;
    let err = AppConfig::from_str(content).unwrap_err();
    assert!(format!("{:#}", err).contains("min_delay_ms 2 exceeds max_delay_ms 1"));
}

#[test]
fn rejects_out_of_range_qos() {
    let content = r#"
[adapters.a1]
type = "simulation"

[[adapters.a1.polling]]
tag = "temp"
qos = 3
"#;
    assert!(AppConfig::from_str(content).is_err());
}

#[test]
fn rejects_empty_configuration() {
    let err = AppConfig::from_str("").unwrap_err();
    assert!(err.to_string().contains("at least one adapter"));
}

#[test]
fn load_with_source_picks_first_existing_candidate() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(SAMPLE.as_bytes()).unwrap();
    file.flush().unwrap();

    let missing = std::env::temp_dir().join("edge-config-does-not-exist.toml");
    let candidates = vec![missing, file.path().to_path_buf()];
    let loaded = AppConfig::load_with_source(&candidates).unwrap();
    assert_eq!(loaded.source, file.path());
    assert_eq!(loaded.config.adapters.len(), 2);
}
