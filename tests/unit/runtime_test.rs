//! Tests for the tokio spawner and the API handlers

use std::time::Duration;

use worker_dispatch::builders::ServiceBuilder;
use worker_dispatch::config::{SharedConfig, WorkersConfig};
use worker_dispatch::core::Spawn;
use worker_dispatch::runtime::api::{self, AddTaskRequest, CancelGroupRequest, DetectFinishedTaskRequest, ReloadRequest};
use worker_dispatch::runtime::tokio_spawner::TokioSpawner;
use worker_dispatch::util::now_unix_secs;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_api_round_trip() {
    let config = SharedConfig::new(WorkersConfig::new("cat").with_bounds(1, 1));
    let service = ServiceBuilder::new(config, TokioSpawner::current())
        .stop_handler(|_reason: &str| {})
        .build()
        .unwrap();
    service.start();

    let req: AddTaskRequest = serde_json::from_value(serde_json::json!({
        "group_uuid": "g",
        "task_uuid": "t1",
        "unix_timeout": now_unix_secs() + 60,
        "payload": "{\"n\": 1}",
    }))
    .unwrap();
    assert_eq!(api::add_task(&service, req).unwrap().task_uuid, "t1");

    let poll = DetectFinishedTaskRequest { group_uuid: "g".into() };
    let mut response = api::detect_any_finished_task(&service, &poll);
    for _ in 0..500 {
        if response.is_finished {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        response = api::detect_any_finished_task(&service, &poll);
    }
    assert!(response.is_finished);
    assert_eq!(response.response, "{\"n\": 1}");

    let health = api::health(&service);
    assert!(health.ok);
    assert!(!health.paused);

    let json: serde_json::Value = serde_json::from_str(&api::stats_json(&service).unwrap()).unwrap();
    assert_eq!(json["tasks"]["added_total"], 1);

    let outcome = api::cancel_group(&service, &CancelGroupRequest { group_uuid: "g".into() });
    assert_eq!(outcome.waiting, 0);

    service.close().await;
    assert!(!api::health(&service).ok);
    let reload = ReloadRequest { message: "deploy".into() };
    assert!(api::reload(&service, &reload).is_err());
    assert!(api::add_task(
        &service,
        AddTaskRequest {
            group_uuid: "g".into(),
            task_uuid: "t2".into(),
            unix_timeout: now_unix_secs() + 60,
            payload: String::new(),
        }
    )
    .is_err());
}
