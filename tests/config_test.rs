//! Integration tests for configuration loading

use ridematch::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[service]
id = "test-service"

[matching]
deviation_threshold_km = 8.0
endpoint_threshold_km = 15.0
max_results = 5

[corridor]
width_m = 250.0
alert_cooldown_secs = 120

[reassignment]
window_after_hours = 12
min_score = 55.0
exclude_same_driver = false
max_hops = 1

[routing]
base_url = "http://osrm.internal:5000/"
timeout_ms = 1500

[events]
file = "/tmp/ridematch-events.jsonl"

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.service_id(), "test-service");
    assert_eq!(config.matching().deviation_threshold_km, 8.0);
    assert_eq!(config.matching().endpoint_threshold_km, 15.0);
    assert_eq!(config.matching().max_results, 5);
    // Unset fields keep their defaults
    assert_eq!(config.matching().max_detour_percent, 20.0);
    assert_eq!(config.corridor().width_km(), 0.25);
    assert_eq!(config.corridor().alert_cooldown_secs, 120);
    assert_eq!(config.corridor().speed_limit_kmh, 120.0);
    assert_eq!(config.reassignment().window_after_hours, 12);
    assert_eq!(config.reassignment().window_before_hours, 24);
    assert_eq!(config.reassignment().min_score, 55.0);
    assert!(!config.reassignment().exclude_same_driver);
    assert_eq!(config.reassignment().max_hops, 1);
    assert_eq!(config.routing().timeout_ms, 1500);
    assert_eq!(config.routing().profile, "driving");
    assert_eq!(config.events_file(), "/tmp/ridematch-events.jsonl");
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_invalid_values_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[reassignment]\nmin_score = 140.0\n")
        .unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("min_score"));
}

#[test]
fn test_negative_search_window_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[reassignment]\nwindow_before_hours = -6\n")
        .unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("window_before_hours"));
}

#[test]
fn test_malformed_toml_is_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[matching\ndeviation_threshold_km = ").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
    // The lenient loader falls back to defaults
    let config = Config::load_from_path(&temp_file.path().display().to_string());
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.service_id(), "ridematch");
    assert_eq!(config.matching().deviation_threshold_km, 10.0);
    assert_eq!(config.corridor().width_m, 500.0);
    assert_eq!(config.events_channel_capacity(), 1000);
}

#[test]
fn test_dev_config_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml");
    let config = Config::from_file(path).unwrap();
    assert_eq!(config.service_id(), "ridematch-dev");
    assert_eq!(config.reassignment().max_hops, 3);
}
