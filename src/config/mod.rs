//! Configuration models for the worker pool and the service loops.

pub mod service;
pub mod workers;

pub use service::ServiceOptions;
pub use workers::{ConfigProvider, EnvConfigProvider, SharedConfig, WorkersConfig};
