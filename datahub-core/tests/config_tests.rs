//! Configuration loading error messages and atomic-persistence integration tests.

use assert_fs::prelude::*;
use datahub_core::{
    config::{load_client_config_at, load_hub_config_at},
    persist, ConfigError,
};
use predicates::prelude::predicate;
use serde_json::json;

// ---------------------------------------------------------------------------
// 1. Load errors
// ---------------------------------------------------------------------------

#[test]
fn missing_hub_config_returns_not_found() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let err = load_hub_config_at(&dir.path().join("config.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("config.yaml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = load_hub_config_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn client_config_without_hub_url_is_rejected() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("client.yaml");
    file.write_str("hub:\n  url: \"  \"\ndatasets: []\n").expect("write");

    let err = load_client_config_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Full documents
// ---------------------------------------------------------------------------

#[test]
fn full_hub_config_loads() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("config.yaml");
    file.write_str(
        r#"
datasets:
  - name: stock-trading-data
    path: stock-trading-data
    freshness_threshold: 0.9
  - name: futures
    path: raw/futures
server:
  host: 127.0.0.1
  port: 9000
  data_root: /srv/data
  cache_dir: /srv/cache
check:
  interval_minutes: 5
  debounce_seconds: 10
  extensions: [csv, parquet]
packaging:
  keep_versions: 3
calendar:
  file: trading_calendar.csv
logging:
  level: debug
  json: true
"#,
    )
    .expect("write");

    let cfg = load_hub_config_at(file.path()).expect("load");
    assert_eq!(cfg.datasets.len(), 2);
    assert_eq!(cfg.datasets[0].freshness_threshold, 0.9);
    assert_eq!(cfg.datasets[1].freshness_threshold, 0.85);
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.check.extensions, vec!["csv", "parquet"]);
    assert_eq!(cfg.packaging.keep_versions, 3);
    assert!(cfg.logging.json);
}

// ---------------------------------------------------------------------------
// 3. Atomic persistence
// ---------------------------------------------------------------------------

#[test]
fn atomic_write_leaves_no_tmp_and_creates_dirs() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let target = dir.child("deep").child("dir").child(".last_sync.json");

    persist::write_json_atomic(target.path(), &json!({"a": "2024-01-01T00:00:00.000000Z"}))
        .expect("write");

    target.assert(predicate::path::exists());
    target.assert(predicate::str::contains("2024-01-01T00:00:00.000000Z"));
    dir.child("deep")
        .child("dir")
        .child(".last_sync.json.tmp")
        .assert(predicate::path::missing());
}

#[test]
fn overwrite_replaces_whole_document() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let target = dir.child("state.json");

    persist::write_json_atomic(target.path(), &json!({"a": 1, "b": 2})).expect("first");
    persist::write_json_atomic(target.path(), &json!({"c": 3})).expect("second");

    let loaded: serde_json::Value = persist::load_json_or_default(target.path()).expect("load");
    assert_eq!(loaded, json!({"c": 3}));
}
