//! Tests for configuration loading and validation

use std::io::Write;
use std::time::Duration;

use worker_dispatch::config::workers::{
    ENV_MAX_WORKERS, ENV_MIN_WORKERS, ENV_SCALE_DOWN_PERCENT, ENV_SCALE_UP, ENV_SCALE_UP_PERCENT,
    ENV_WORKER_COMMAND,
};
use worker_dispatch::config::{ConfigProvider, EnvConfigProvider, ServiceOptions, WorkersConfig};
use worker_dispatch::core::ConfigError;

#[test]
fn test_workers_config_validation() {
    let valid = WorkersConfig::new("php worker.php").with_bounds(2, 8);
    assert!(valid.validate().is_ok());

    let invalid = WorkersConfig::new("php worker.php").with_bounds(9, 8);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_workers_config_from_json() {
    let json = r#"{
        "command": "python job.py",
        "min_workers": 2,
        "max_workers": 6,
        "scale_up": 2,
        "scale_up_percent": 75,
        "scale_down_percent": 25
    }"#;
    let cfg = WorkersConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.command, "python job.py");
    assert_eq!(cfg.scale_up, 2);
    assert_eq!(cfg.scale_down_percent, 25);

    let invalid = r#"{"command": "", "max_workers": 2}"#;
    assert!(matches!(
        WorkersConfig::from_json_str(invalid),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_service_options_json_round_trip() {
    let opts = ServiceOptions::new().with_grace(Duration::from_secs(3), Duration::from_secs(9));
    let json = serde_json::to_string(&opts).unwrap();
    let back: ServiceOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(back.task_grace_secs(), 3);
    assert_eq!(back.rotten_grace_secs(), 9);
}

// Environment variables are process-global, so every env scenario lives in
// this single test.
#[test]
fn test_env_provider_reads_and_reloads_env_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{ENV_WORKER_COMMAND}=\"php artisan worker\"").unwrap();
    writeln!(file, "{ENV_MIN_WORKERS}=2").unwrap();
    writeln!(file, "{ENV_MAX_WORKERS}=6").unwrap();
    writeln!(file, "{ENV_SCALE_UP}=3").unwrap();
    writeln!(file, "{ENV_SCALE_UP_PERCENT}=70").unwrap();
    writeln!(file, "{ENV_SCALE_DOWN_PERCENT}=10").unwrap();
    file.flush().unwrap();

    let provider = EnvConfigProvider::new().with_file(file.path());
    let cfg = provider.load().unwrap();
    assert_eq!(cfg.command, "php artisan worker");
    assert_eq!(cfg.min_workers, 2);
    assert_eq!(cfg.max_workers, 6);
    assert_eq!(cfg.scale_up, 3);
    assert_eq!(cfg.scale_up_percent, 70);
    assert_eq!(cfg.scale_down_percent, 10);

    // Edits to the file win over values loaded before.
    writeln!(file, "{ENV_MAX_WORKERS}=12").unwrap();
    file.flush().unwrap();
    assert_eq!(provider.load().unwrap().max_workers, 12);

    writeln!(file, "{ENV_MIN_WORKERS}=two").unwrap();
    file.flush().unwrap();
    assert_eq!(
        provider.load(),
        Err(ConfigError::Env {
            key: ENV_MIN_WORKERS,
            value: "two".into(),
        })
    );

    let missing = EnvConfigProvider::new().with_file("/nonexistent/.env");
    assert!(matches!(missing.load(), Err(ConfigError::Parse(_))));

    // A multi-word command has to be quoted.
    let mut unquoted = tempfile::NamedTempFile::new().unwrap();
    writeln!(unquoted, "{ENV_WORKER_COMMAND}=php artisan worker").unwrap();
    unquoted.flush().unwrap();
    let err = EnvConfigProvider::new().with_file(unquoted.path()).load().unwrap_err();
    match err {
        ConfigError::Parse(message) => {
            assert!(message.contains(&unquoted.path().display().to_string()), "{message}");
        }
        other => panic!("expected a parse error, got {other:?}"),
    }
}
