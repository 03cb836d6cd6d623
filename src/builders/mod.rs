//! Builders that assemble a worker service from its parts.

pub mod service_builder;

pub use service_builder::ServiceBuilder;
