//! Connection interception.
//!
//! [`MockDriver`] sits in front of a real [`Driver`]. For a `mysql+mock://`
//! connection string it provisions (or reuses) the matching ephemeral instance
//! and connects the real driver to it, as `root`, with every mocking option
//! stripped. Any other string is left alone: `connect` answers `None` so the
//! caller can hand it to another driver.

use std::sync::Arc;

use crate::{
    builder::BuildError,
    instance::ConnectionTarget,
    invoker::{SystemInvoker, ToolInvoker},
    options::Options,
    resolver::{self, ResolveError, ResolvedRequest},
    service::MockService,
};

/// Account the ephemeral instances provision.
pub const MOCK_USER: &str = "root";

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A connection option a driver understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverProperty {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    /// Value currently supplied for the option, if any
    pub value: Option<String>,
}

/// The capabilities the interception layer needs from a real driver.
pub trait Driver: Send + Sync {
    type Connection;

    /// Opens a connection to `target` with the given options.
    fn connect(
        &self,
        target: &ConnectionTarget,
        options: &Options,
    ) -> Result<Self::Connection, BoxError>;

    /// Whether this driver handles `url` natively.
    fn accepts_url(&self, url: &str) -> bool;

    fn major_version(&self) -> u32;

    fn minor_version(&self) -> u32;

    /// Options this driver understands, with the supplied values filled in.
    fn property_info(&self, options: &Options) -> Vec<DriverProperty>;
}

/// Intercepts mock connection strings in front of a real driver `D`.
#[derive(Debug)]
pub struct MockDriver<D, I: ToolInvoker = SystemInvoker> {
    service: Arc<MockService<I>>,
    inner: D,
}

impl<D: Driver, I: ToolInvoker> MockDriver<D, I> {
    pub fn new(service: Arc<MockService<I>>, inner: D) -> Self {
        Self { service, inner }
    }

    pub fn service(&self) -> &Arc<MockService<I>> {
        &self.service
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Connects to the ephemeral instance standing in for `url`.
    ///
    /// Returns `Ok(None)` for strings that are not mock connection strings.
    pub fn connect(
        &self,
        url: &str,
        options: &Options,
    ) -> Result<Option<D::Connection>, ConnectError> {
        let Some(request) = self.service.resolve(url, options)? else {
            return Ok(None);
        };

        let instance = self.service.get_or_build(&request)?;
        let options = clean_options(&request);

        tracing::debug!(
            mock_key = %request.mock_key,
            target = %instance.target(),
            "connecting to mock instance"
        );

        self.inner
            .connect(instance.target(), &options)
            .map(Some)
            .map_err(ConnectError::Driver)
    }

    /// Whether `url` is a mock connection string.
    pub fn accepts_url(&self, url: &str) -> bool {
        resolver::recognizes(url)
    }

    pub fn major_version(&self) -> u32 {
        self.inner.major_version()
    }

    pub fn minor_version(&self) -> u32 {
        self.inner.minor_version()
    }

    pub fn property_info(&self, options: &Options) -> Vec<DriverProperty> {
        self.inner.property_info(options)
    }
}

/// The options handed to the real driver: pass-through options only, with
/// the user forced to [`MOCK_USER`].
pub fn clean_options(request: &ResolvedRequest) -> Options {
    let mut options = request.pass_through.clone();
    options.insert("user".to_string(), MOCK_USER.to_string());
    options
}

/// Errors raised while intercepting a connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Build(#[from] BuildError),

    /// The real driver failed to connect to the ephemeral instance
    #[error("failed to connect to mock instance")]
    Driver(#[source] BoxError),
}

/// In-tree integration tests
#[cfg(test)]
mod tests {
    mod it_connect;
}
