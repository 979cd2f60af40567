//! Configuration loading and rejection before any task starts.
//!
//! Tests that read `GEONODE_*` environment variables run `#[serial]`.

use geophone_node::config::NodeConfig;
use geophone_node::data::TimestampWidth;
use geophone_node::error::NodeError;
use geophone_node::hardware::mock::{FixedClock, MockAnalogInput, MockTransport};
use geophone_node::hardware::SendMode;
use geophone_node::pipeline::{Collaborators, Node};
use std::io::Write;
use std::sync::Arc;
use serial_test::serial;
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file
}

fn collaborators() -> (Collaborators, Arc<MockAnalogInput>) {
    let adc = Arc::new(MockAnalogInput::new(100, 0));
    (
        Collaborators {
            adc: adc.clone(),
            clock: Arc::new(FixedClock(0)),
            transport: Arc::new(MockTransport::new()),
        },
        adc,
    )
}

#[test]
#[serial]
fn test_load_from_file() {
    let file = write_config(
        r#"
        [application]
        name = "ridge-07"
        log_level = "debug"

        [sampling]
        period_ms = 5

        [store]
        capacity = 4096

        [transmit]
        window = 2048
        mode = "confirmed"
        timestamp = "millis64"
        "#,
    );

    let config = assert_ok!(NodeConfig::load_from(file.path()));
    assert_ok!(config.validate());
    assert_eq!(config.application.name, "ridge-07");
    assert_eq!(config.sampling.period_ms, 5);
    assert_eq!(config.sta_samples(), 510);
    assert_eq!(config.lta_samples(), 2046);
    assert_eq!(config.transmit.window, 2048);
    assert_eq!(config.transmit.mode, SendMode::Confirmed);
    assert_eq!(config.transmit.timestamp, TimestampWidth::Millis64);
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = assert_ok!(NodeConfig::load_from(dir.path().join("absent.toml")));
    assert_eq!(config.store, NodeConfig::default().store);
    assert_eq!(config.sampling, NodeConfig::default().sampling);
}

#[test]
#[serial]
fn test_malformed_file_is_config_error() {
    let file = write_config("[store\ncapacity = 10");
    let err = assert_err!(NodeConfig::load_from(file.path()));
    assert!(matches!(err, NodeError::Config(_)));
}

#[test]
#[serial]
fn test_unknown_mode_is_config_error() {
    let file = write_config("[transmit]\nmode = \"maybe\"");
    assert_err!(NodeConfig::load_from(file.path()));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config("[detection]\ntrigger_ratio = 4.0\nreset_ratio = 2.0");
    std::env::set_var("GEONODE_DETECTION__RESET_RATIO", "1.25");

    let config = NodeConfig::load_from(file.path());
    std::env::remove_var("GEONODE_DETECTION__RESET_RATIO");

    let config = assert_ok!(config);
    assert_eq!(config.detection.trigger_ratio, 4.0);
    assert_eq!(config.detection.reset_ratio, 1.25);
}

#[test]
#[serial]
fn test_inverted_thresholds_rejected_before_tasks_start() {
    let file = write_config("[detection]\ntrigger_ratio = 1.0\nreset_ratio = 1.5");
    let config = assert_ok!(NodeConfig::load_from(file.path()));
    let (collaborators, adc) = collaborators();

    let Err(err) = Node::new(&config, collaborators) else {
        panic!("node built from inverted thresholds");
    };
    assert!(err.to_string().contains("reset ratio"));
    assert_eq!(adc.acquisitions(), 0);
}

#[test]
fn test_long_window_exceeding_capacity_rejected() {
    let config = assert_ok!(NodeConfig::from_toml_str(
        "[store]\ncapacity = 512\n[transmit]\nwindow = 512"
    ));
    let (collaborators, _) = collaborators();

    let Err(err) = Node::new(&config, collaborators) else {
        panic!("node built with a long window larger than the store");
    };
    assert!(matches!(err, NodeError::Configuration(_)));
    assert!(err.to_string().contains("exceeds store capacity"));
}

#[test]
fn test_short_window_not_shorter_than_long_rejected() {
    let config = assert_ok!(NodeConfig::from_toml_str(
        "[detection]\nsta_window_ms = 500\nlta_window_ms = 500"
    ));
    assert_err!(config.validate());
}

#[test]
fn test_zero_capacity_rejected() {
    let config = assert_ok!(NodeConfig::from_toml_str("[store]\ncapacity = 0"));
    let err = assert_err!(config.validate());
    assert!(err.to_string().contains("store.capacity"));
}
