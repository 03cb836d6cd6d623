//! # Worker Dispatch
//!
//! A local job-dispatch engine that keeps a pool of external worker processes
//! alive and feeds them tasks over stdio.
//!
//! Each worker is an ordinary command (`php worker.php`, `python job.py`, ...)
//! that reads framed requests from stdin and writes one framed reply per
//! request to stdout. A frame is a 20-digit zero-padded decimal length followed
//! by that many bytes.
//!
//! ## Key Features
//!
//! - **Load-based scaling**: the pool grows by a configured step when the busy
//!   percentage crosses a threshold and retires idle workers when it stays low
//! - **Per-task deadlines**: tasks past their unix deadline finish as `timeout`
//!   without losing the worker
//! - **Group cancellation**: drop every waiting, running and finished task of a
//!   group in one call
//! - **Hot reload**: swap the worker command; busy workers finish their task
//!   before they are replaced
//! - **Bounded shutdown**: stop admitting, drain busy workers, then kill
//!
//! ## Usage
//!
//! ```rust,no_run
//! use worker_dispatch::builders::ServiceBuilder;
//! use worker_dispatch::config::{SharedConfig, WorkersConfig};
//! use worker_dispatch::runtime::TokioSpawner;
//! use worker_dispatch::util::now_unix_secs;
//!
//! # async fn run() -> Result<(), worker_dispatch::core::ServiceError> {
//! let config = SharedConfig::new(WorkersConfig::new("php worker.php").with_bounds(2, 8));
//! let service = ServiceBuilder::new(config, TokioSpawner::current()).build()?;
//! service.start();
//!
//! service.add_task("group-1", "task-1", now_unix_secs() + 30, "{\"job\": 1}")?;
//! let task = service.detect_any_finished_task("group-1");
//! if task.is_finished {
//!     println!("{} -> {}", task.task_uuid, task.response);
//! }
//!
//! service.close().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Task stores, worker processes, the worker pool and the service loops.
pub mod core;
/// Configuration models for the worker pool and the service loops.
pub mod config;
/// Builders to assemble the service from configuration.
pub mod builders;
/// Runtime adapter and transport-facing API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
