//! Configuration loading from files and the environment.

use std::io::Write;
use std::time::Duration;

use daq_traces::config::EngineConfig;
use daq_traces::model::{ModelOptions, TraceModel};
use serial_test::serial;

#[test]
#[serial]
fn file_values_override_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "log_level = \"debug\"").unwrap();
    writeln!(file, "math_update_interval_ms = 250").unwrap();

    let config = EngineConfig::load_from(file.path()).unwrap();
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.math_update_interval_ms, 250);
    assert_eq!(config.default_velocity_factor, 0.66);
    assert!(config.validate().is_ok());

    let options = ModelOptions::from(&config);
    assert_eq!(options.update_interval, Duration::from_millis(250));
}

#[test]
#[serial]
fn environment_overrides_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "default_velocity_factor = 0.8").unwrap();

    std::env::set_var("DAQ_TRACES_DEFAULT_VELOCITY_FACTOR", "0.5");
    let config = EngineConfig::load_from(file.path());
    std::env::remove_var("DAQ_TRACES_DEFAULT_VELOCITY_FACTOR");

    let config = config.unwrap();
    assert_eq!(config.default_velocity_factor, 0.5);
    let mut model = TraceModel::from_config(&config);
    let id = model.create_trace("A");
    assert_eq!(model.trace(id).unwrap().velocity_factor(), 0.5);
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, EngineConfig::default());
}

#[test]
#[serial]
fn invalid_values_fail_validation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "expression_operation_limit = 0").unwrap();
    let config = EngineConfig::load_from(file.path()).unwrap();
    assert!(config.validate().is_err());
}
