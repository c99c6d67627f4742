use octobridge::config::Config;
use std::fs;

fn valid_config() -> Config {
    let mut cfg = Config::default();
    cfg.api.email = "user@example.com".to_string();
    cfg.api.password = "secret".to_string();
    cfg
}

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = valid_config();
    cfg.accounts = vec!["A-1".to_string()];
    cfg.poll_interval_minutes = 5;
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.api.email, "user@example.com");
    assert_eq!(loaded.accounts, vec!["A-1".to_string()]);
    assert_eq!(loaded.poll_interval_minutes, 5);
    assert_eq!(loaded.logging.file, cfg.logging.file);
}

#[test]
fn config_validation_errors() {
    let mut cfg = valid_config();
    assert!(cfg.validate().is_ok());

    // Missing credentials
    cfg.api.email.clear();
    assert!(cfg.validate().is_err());

    cfg = valid_config();
    cfg.api.password.clear();
    assert!(cfg.validate().is_err());

    // Empty endpoint
    cfg = valid_config();
    cfg.api.endpoint.clear();
    assert!(cfg.validate().is_err());

    // Poll interval zero
    cfg = valid_config();
    cfg.poll_interval_minutes = 0;
    assert!(cfg.validate().is_err());

    // Pending grace period zero
    cfg = valid_config();
    cfg.pending_timeout_minutes = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), ":::: not yaml ::::").unwrap();
    assert!(Config::from_file(tmp.path()).is_err());
}

#[test]
fn minimal_yaml_gets_defaults() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(
        tmp.path(),
        "api:\n  email: user@example.com\n  password: secret\nlogging:\n  level: INFO\n  file: /tmp/octobridge.log\n  backup_count: 3\n",
    )
    .unwrap();

    let cfg = Config::from_file(tmp.path()).unwrap();
    assert_eq!(cfg.poll_interval_minutes, 2);
    assert_eq!(cfg.pending_timeout_minutes, 5);
    assert!(cfg.api.endpoint.contains("oeg-kraken.energy"));
    assert_eq!(cfg.api.timeout_secs, 30);
    assert!(cfg.accounts.is_empty());
}
