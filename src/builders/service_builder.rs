//! Builder for [`WorkerService`].

use crate::config::{ConfigProvider, ServiceOptions};
use crate::core::{ServiceError, SignalStopHandler, Spawn, StopHandler, WorkerService};

/// Collects a config provider, a spawner and optional overrides.
pub struct ServiceBuilder<S> {
    provider: Box<dyn ConfigProvider>,
    spawner: S,
    options: ServiceOptions,
    stop_handler: Box<dyn StopHandler>,
}

impl<S> ServiceBuilder<S>
where
    S: Spawn + Send + Sync + 'static,
{
    /// Start a builder with default options and the signal stop handler.
    pub fn new(provider: impl ConfigProvider + 'static, spawner: S) -> Self {
        Self {
            provider: Box::new(provider),
            spawner,
            options: ServiceOptions::default(),
            stop_handler: Box::new(SignalStopHandler),
        }
    }

    /// Override loop timings and retry policy.
    #[must_use]
    pub fn options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    /// Override what [`WorkerService::stop`] does.
    #[must_use]
    pub fn stop_handler(mut self, handler: impl StopHandler + 'static) -> Self {
        self.stop_handler = Box::new(handler);
        self
    }

    /// Validate everything and create the service, without starting it.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Config`] for invalid options or an unusable initial
    /// configuration.
    pub fn build(self) -> Result<WorkerService<S>, ServiceError> {
        WorkerService::new(self.provider, self.options, self.spawner, self.stop_handler)
    }
}
