//! Transport-neutral request/response models and handlers.
//!
//! A transport (RPC, HTTP, a CLI) deserializes one of the request types, calls
//! the matching handler and serializes the result. Errors come back as
//! display strings so they can cross any wire.

use serde::{Deserialize, Serialize};

use crate::core::{CancelOutcome, GroupUuid, Spawn, Task, TaskUuid, WorkerService};

/// Submit a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTaskRequest {
    /// Group identifier.
    pub group_uuid: GroupUuid,
    /// Task identifier, unique within the group while outstanding.
    pub task_uuid: TaskUuid,
    /// Deadline in unix seconds.
    pub unix_timeout: i64,
    /// Opaque payload for the worker.
    pub payload: String,
}

/// Acknowledges a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTaskResponse {
    /// Identifier of the accepted task.
    pub task_uuid: TaskUuid,
}

/// Poll a group for a finished task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectFinishedTaskRequest {
    /// Group identifier.
    pub group_uuid: GroupUuid,
}

/// Outcome of a poll. `is_finished == false` means nothing was ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Group identifier.
    pub group_uuid: GroupUuid,
    /// Task identifier, empty when nothing was ready.
    pub task_uuid: TaskUuid,
    /// Whether a finished task was returned.
    pub is_finished: bool,
    /// Worker response or error text.
    pub response: String,
    /// Whether `response` is an error.
    pub is_error: bool,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            group_uuid: task.group_uuid,
            task_uuid: task.task_uuid,
            is_finished: task.is_finished,
            response: task.response,
            is_error: task.is_error,
        }
    }
}

/// Cancel every task of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelGroupRequest {
    /// Group identifier.
    pub group_uuid: GroupUuid,
}

/// Reload workers, or stop the server, with a reason for the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadRequest {
    /// Free-form reason.
    pub message: String,
}

/// Liveness payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag; false once shutdown began.
    pub ok: bool,
    /// Live workers.
    pub workers: usize,
    /// Dispatch is suspended.
    pub paused: bool,
}

/// Queue a task.
///
/// # Errors
///
/// The service error text, e.g. when the service is closing.
pub fn add_task<S>(service: &WorkerService<S>, req: AddTaskRequest) -> Result<AddTaskResponse, String>
where
    S: Spawn + Send + Sync + 'static,
{
    service
        .add_task(req.group_uuid, req.task_uuid, req.unix_timeout, req.payload)
        .map(|task| AddTaskResponse {
            task_uuid: task.task_uuid,
        })
        .map_err(|e| e.to_string())
}

/// Collect one finished task of the group, if any.
pub fn detect_any_finished_task<S>(service: &WorkerService<S>, req: &DetectFinishedTaskRequest) -> TaskResponse
where
    S: Spawn + Send + Sync + 'static,
{
    service.detect_any_finished_task(&req.group_uuid).into()
}

/// Cancel a group.
pub fn cancel_group<S>(service: &WorkerService<S>, req: &CancelGroupRequest) -> CancelOutcome
where
    S: Spawn + Send + Sync + 'static,
{
    service.cancel_group(&req.group_uuid)
}

/// Reload workers.
///
/// # Errors
///
/// Refused while the service is closing.
pub fn reload<S>(service: &WorkerService<S>, req: &ReloadRequest) -> Result<usize, String>
where
    S: Spawn + Send + Sync + 'static,
{
    if service.is_closing() {
        return Err("service is closing".into());
    }
    Ok(service.reload(&req.message))
}

/// Ask the server to terminate.
pub fn stop<S>(service: &WorkerService<S>, req: &ReloadRequest)
where
    S: Spawn + Send + Sync + 'static,
{
    service.stop(&req.message);
}

/// Stats snapshot rendered as JSON.
///
/// # Errors
///
/// Serialization failure text.
pub fn stats_json<S>(service: &WorkerService<S>) -> Result<String, String>
where
    S: Spawn + Send + Sync + 'static,
{
    service.stats().to_json().map_err(|e| e.to_string())
}

/// Return a health payload.
pub fn health<S>(service: &WorkerService<S>) -> Health
where
    S: Spawn + Send + Sync + 'static,
{
    Health {
        ok: !service.is_closing(),
        workers: service.stats().workers.count,
        paused: service.is_paused(),
    }
}
