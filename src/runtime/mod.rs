//! Runtime adapter and transport-facing API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{
    AddTaskRequest, AddTaskResponse, CancelGroupRequest, DetectFinishedTaskRequest, Health,
    ReloadRequest, TaskResponse,
};
pub use tokio_spawner::TokioSpawner;
