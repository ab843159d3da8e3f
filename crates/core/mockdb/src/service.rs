//! The process-scoped mocking service.
//!
//! A [`MockService`] owns the registry, the builder and with them the
//! remembered default tool directory and the staged paths awaiting cleanup.
//! Construct one at startup and share it (usually behind an [`Arc`]) with
//! every caller that intercepts connections.
//!
//! [`Arc`]: std::sync::Arc

use std::sync::Arc;

use crate::{
    builder::{BuildError, BuilderSettings, MockBuilder},
    instance::MockedInstance,
    invoker::{SystemInvoker, ToolInvoker},
    options::Options,
    registry::MockRegistry,
    resolver::{self, ResolveError, ResolvedRequest},
};

#[derive(Debug)]
pub struct MockService<I: ToolInvoker = SystemInvoker> {
    registry: MockRegistry,
    builder: MockBuilder<I>,
}

impl MockService<SystemInvoker> {
    /// A service running the real external tools.
    pub fn new(settings: BuilderSettings) -> Self {
        Self::with_invoker(SystemInvoker, settings)
    }
}

impl<I: ToolInvoker> MockService<I> {
    pub fn with_invoker(invoker: I, settings: BuilderSettings) -> Self {
        Self {
            registry: MockRegistry::new(),
            builder: MockBuilder::new(invoker, settings),
        }
    }

    /// See [`resolver::resolve`].
    pub fn resolve(
        &self,
        url: &str,
        options: &Options,
    ) -> Result<Option<ResolvedRequest>, ResolveError> {
        resolver::resolve(url, options)
    }

    /// Returns the instance for `request`, provisioning it on first use.
    pub fn get_or_build(&self, request: &ResolvedRequest) -> Result<Arc<MockedInstance>, BuildError> {
        self.registry.get_or_build(request, &self.builder)
    }

    pub fn registry(&self) -> &MockRegistry {
        &self.registry
    }

    pub fn builder(&self) -> &MockBuilder<I> {
        &self.builder
    }

    /// Stops every daemon, then removes staged paths unless they are kept.
    ///
    /// Safe to call more than once; dropping the service calls it too.
    pub fn shutdown(&self) {
        tracing::info!(instances = self.registry.len(), "shutting down mock service");
        self.registry.terminate_all();
        self.builder.cleanup().run();
    }
}

impl<I: ToolInvoker> Drop for MockService<I> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
