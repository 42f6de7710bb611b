//! End-to-end loading of a bridge configuration file with secrets

use oh_config::{BridgeConfig, ConfigError, Credentials};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_with_secrets() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("secrets.yaml"),
        "openhab_token: oh.bridge.abcdef\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("bridge.yaml"),
        r#"
servers:
  - name: home
    base_url: https://openhab.local:8443
    allow_self_signed: true
    token: !secret openhab_token
    retry_initial_ms: 1000
    retry_max_ms: 8000
    event_filter: "openhab/items/*"
    not_found_probe: always
"#,
    )
    .unwrap();

    let config = BridgeConfig::load(dir.path().join("bridge.yaml")).unwrap();
    assert_eq!(config.servers.len(), 1);

    let server = &config.servers[0];
    assert!(server.allow_self_signed);
    assert_eq!(
        server.credentials(),
        Credentials::Bearer("oh.bridge.abcdef".to_string())
    );
    assert_eq!(server.retry_max_ms, 8000);
    assert_eq!(server.event_filter.as_deref(), Some("openhab/items/*"));
}

#[test]
fn test_load_rejects_invalid_server() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("bridge.yaml"),
        "servers:\n  - name: home\n    base_url: ftp://openhab\n",
    )
    .unwrap();

    let err = BridgeConfig::load(dir.path().join("bridge.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationFailed { server, .. } if server == "home"));
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = BridgeConfig::load(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
}
