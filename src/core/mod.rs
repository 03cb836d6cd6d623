//! Task stores, worker processes, the worker pool and the service loops.

pub mod error;
pub mod framing;
pub mod process;
pub mod service;
pub mod spawn;
pub mod stats;
pub mod task;
pub mod task_store;
pub mod tasks;
pub mod worker_pool;

pub use error::{ConfigError, ProcessError, ServiceError};
pub use process::{Process, ProcessOptions};
pub use service::{CancelOutcome, SignalStopHandler, StopHandler, WorkerService};
pub use spawn::Spawn;
pub use stats::{ServiceStats, SpawnStats, TaskStats, WorkerStats};
pub use task::{GroupUuid, Task, TaskKey, TaskUuid, CLOSING_RESPONSE, TIMEOUT_RESPONSE};
pub use task_store::TaskStore;
pub use tasks::Tasks;
pub use worker_pool::{DrainOutcome, WorkerLease, WorkerPool};
