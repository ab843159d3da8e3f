//! TOML configuration file loading with environment variable overrides.
//!
//! Deserializes a [`MockDbConfig`] from an optional TOML file using
//! [Figment], merging `MOCKDB_CONFIG_*` environment variables on top.
//!
//! ## Priority chain
//!
//! | Priority | Source | Mechanism |
//! |----------|--------|-----------|
//! | 1 (highest) | `MOCKDB_CONFIG_*` env vars | `merge` |
//! | 2 | TOML file values | `merge` |
//! | 3 (lowest) | serde defaults | field defaults |
//!
//! ## Environment variables
//!
//! All env vars are prefixed with `MOCKDB_CONFIG_` and use double underscores
//! to separate nested keys. For example, `MOCKDB_CONFIG_MOCK__MOCK_PORT` maps
//! to `mock.mock_port` in the config file.

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format as _, Toml},
};

use crate::MockDbConfig;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "MOCKDB_CONFIG_";

/// The provider chain for `config_path` (if any) plus the environment.
pub fn figment(config_path: Option<&Path>) -> Figment {
    let mut figment = Figment::new();
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load a [`MockDbConfig`] from a TOML file with env-var overrides.
///
/// See the [module-level docs](self) for the priority chain. A missing file
/// contributes nothing; all sections are optional.
pub fn load(config_path: Option<&Path>) -> Result<MockDbConfig, LoadConfigFileError> {
    if let Some(path) = config_path.filter(|path| !path.exists()) {
        tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
    }

    extract(figment(config_path))
}

/// Extracts a [`MockDbConfig`] from an arbitrary provider chain.
pub fn extract(figment: Figment) -> Result<MockDbConfig, LoadConfigFileError> {
    figment
        .extract()
        .map_err(|err| LoadConfigFileError(Box::new(err)))
}

/// Error when loading configuration from a TOML file.
#[derive(Debug, thiserror::Error)]
#[error("Failed to load configuration file")]
pub struct LoadConfigFileError(#[source] pub Box<figment::Error>);
