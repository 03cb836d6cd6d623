//! Tests for the service builder

use std::sync::Arc;
use std::time::Duration;

use worker_dispatch::builders::ServiceBuilder;
use worker_dispatch::config::{ServiceOptions, SharedConfig, WorkersConfig};
use worker_dispatch::runtime::TokioSpawner;

#[tokio::test]
async fn test_build_does_not_start_workers() {
    let config = Arc::new(SharedConfig::new(WorkersConfig::new("cat").with_bounds(2, 4)));
    let service = ServiceBuilder::new(Arc::clone(&config), TokioSpawner::current())
        .options(ServiceOptions::new().with_control_interval(Duration::from_millis(20)))
        .build()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(service.stats().workers.count, 0);
    assert_eq!(service.config().max_workers, 4);
    assert!(!service.is_closing());
    assert!(!service.is_paused());
}

#[tokio::test]
async fn test_build_validates_options() {
    let result = ServiceBuilder::new(SharedConfig::new(WorkersConfig::new("cat")), TokioSpawner::current())
        .options(ServiceOptions::new().with_spawn_backoff(0, Duration::from_secs(1), Duration::from_secs(2)))
        .build();
    assert!(result.is_err());
}
