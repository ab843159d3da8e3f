//! Disposable, schema-only MySQL instances provisioned on connect.
//!
//! A client asks for `mysql+mock://host[:port]/db?...` instead of the real
//! database. The first such request for a given reference database snapshots
//! its schema with `mysqldump`, bootstraps a private `mysqld` on the requested
//! `mockPort` and replays the schema into it. The client then gets a
//! connection to that instance; later requests for the same database reuse it.
//!
//! The pieces, in request order:
//!
//! - [`resolver`]: parses the connection string and computes the [`MockKey`]
//! - [`registry`]: maps keys to instances, building each at most once
//! - [`builder`]: the provisioning pipeline
//! - [`invoker`]: runs the external tools
//! - [`driver`]: the interception façade in front of a real [`Driver`]
//!
//! [`MockService`] ties resolver, registry and builder together and owns
//! their process-scoped state.

pub mod builder;
pub mod driver;
pub mod instance;
pub mod invoker;
pub mod mysql;
pub mod options;
pub mod redacted;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod snapshot;
pub mod staging;
pub mod template;
pub mod tools;
pub mod utils;

#[cfg(test)]
mod testing;

pub use self::{
    builder::{BuildError, BuilderSettings, MockBuilder, Readiness},
    driver::{ConnectError, Driver, MockDriver},
    instance::{ConnectionTarget, MockedInstance},
    invoker::{SystemInvoker, ToolInvoker},
    mysql::SqlxMySqlDriver,
    options::{OptionKey, Options},
    redacted::Redacted,
    resolver::{MOCK_URL_PREFIX, MockKey, ResolveError, ResolvedRequest},
    service::MockService,
    snapshot::BenignStderr,
    template::TemplateSource,
    utils::{SqlSession, truncate_database},
};
