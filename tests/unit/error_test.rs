//! Tests for error types

use uuid::Uuid;
use worker_dispatch::core::{ConfigError, ProcessError, ServiceError};

#[test]
fn test_closing_error() {
    let err = ServiceError::Closing;
    assert_eq!(format!("{}", err), "service is closing");
}

#[test]
fn test_empty_command_error() {
    assert_eq!(ProcessError::EmptyCommand.to_string(), "worker command is empty");
}

#[test]
fn test_framing_error_includes_salvaged_output() {
    let err = ProcessError::Framing {
        header: "Fatal error: Uncaug".to_string(),
        output: ": ht exception".to_string(),
    };
    assert_eq!(err.to_string(), "malformed frame header \"Fatal error: Uncaug\": ht exception");
}

#[test]
fn test_closed_error_names_process() {
    let uuid = Uuid::nil();
    assert_eq!(
        ProcessError::Closed(uuid).to_string(),
        "process 00000000-0000-0000-0000-000000000000 output closed"
    );
}

#[test]
fn test_config_error_converts_to_service_error() {
    let err: ServiceError = ConfigError::Invalid("max_workers must be greater than 0".into()).into();
    assert!(matches!(err, ServiceError::Config(_)));
    assert_eq!(
        err.to_string(),
        "invalid configuration: max_workers must be greater than 0"
    );
}

#[test]
fn test_env_error_display() {
    let err = ConfigError::Env {
        key: "MIN_WORKERS_NUMBER",
        value: "two".into(),
    };
    assert_eq!(
        err.to_string(),
        "environment variable MIN_WORKERS_NUMBER has invalid value \"two\""
    );
}
