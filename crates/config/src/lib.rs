//! Configuration of the mocking layer.
//!
//! ```toml
//! [mock]
//! mock_port = 3307
//! bin_location = "/usr/local/mysql/bin"
//! readiness = "poll"
//!
//! [persistence]
//! url = "mysql+mock://db.internal:3306/shop"
//! user = "app"
//! password = "s3cret"
//!
//! [persistence.options]
//! charset = "utf8mb4"
//! ```
//!
//! `[mock]` tunes the builder and supplies defaults for the connection
//! options every mock request needs. `[persistence]` describes one
//! preconfigured connection, see [`MockDbConfig::connection_options`].

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use mockdb::{
    BenignStderr, BuilderSettings, OptionKey, Options, Readiness, Redacted, TemplateSource,
    staging::KEEP_STAGING_DIRS,
};
use serde::Deserialize;

pub mod config_file;

pub use self::config_file::{LoadConfigFileError, load};

/// Default settling delay after the bring-up server starts, in milliseconds
pub const DEFAULT_BOOTSTRAP_SETTLE_MS: u64 = 2500;

/// Default settling delay after the long-lived server starts, in milliseconds
pub const DEFAULT_RELAUNCH_SETTLE_MS: u64 = 3500;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockDbConfig {
    #[serde(default)]
    pub mock: MockConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockConfig {
    /// Port of the ephemeral instance, used when a request omits `mockPort`
    pub mock_port: Option<u16>,
    /// Directory holding the MySQL tools, used when a request omits `binLocation`
    pub bin_location: Option<PathBuf>,
    /// Staging directory, used when a request omits `tempFolder`
    pub temp_folder: Option<PathBuf>,
    /// Keep staging directories at shutdown (default: `MOCKDB_KEEP_STAGING`)
    pub keep_staging: Option<bool>,
    /// Settling delay after the bring-up server starts (default: 2500)
    #[serde(default = "default_bootstrap_settle_ms")]
    pub bootstrap_settle_ms: u64,
    /// Settling delay after the long-lived server starts (default: 3500)
    #[serde(default = "default_relaunch_settle_ms")]
    pub relaunch_settle_ms: u64,
    /// How server readiness is awaited (default: `fixed`)
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Data-directory template archive (default: the bundled one)
    pub template_archive: Option<PathBuf>,
    /// Dump stderr lines containing any of these are ignored (default: `["Using a password"]`)
    #[serde(default = "default_benign_stderr")]
    pub benign_stderr: Vec<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            mock_port: None,
            bin_location: None,
            temp_folder: None,
            keep_staging: None,
            bootstrap_settle_ms: DEFAULT_BOOTSTRAP_SETTLE_MS,
            relaunch_settle_ms: DEFAULT_RELAUNCH_SETTLE_MS,
            readiness: ReadinessConfig::default(),
            template_archive: None,
            benign_stderr: default_benign_stderr(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessConfig {
    /// Sleep for the whole settling delay
    #[default]
    Fixed,
    /// Probe the mock port, bounded by the settling delay
    Poll,
}

impl From<ReadinessConfig> for Readiness {
    fn from(value: ReadinessConfig) -> Self {
        match value {
            ReadinessConfig::Fixed => Readiness::FixedDelay,
            ReadinessConfig::Poll => Readiness::PollPort,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistenceConfig {
    /// Connection string
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<Redacted<String>>,
    /// Extra connection options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl MockDbConfig {
    /// Builder settings described by `[mock]`.
    pub fn builder_settings(&self) -> BuilderSettings {
        let mock = &self.mock;
        BuilderSettings {
            bootstrap_settle: Duration::from_millis(mock.bootstrap_settle_ms),
            relaunch_settle: Duration::from_millis(mock.relaunch_settle_ms),
            readiness: mock.readiness.into(),
            template: mock
                .template_archive
                .clone()
                .map(TemplateSource::File)
                .unwrap_or_default(),
            benign_stderr: BenignStderr::new(mock.benign_stderr.iter().cloned()),
            keep_staging: mock.keep_staging.unwrap_or(*KEEP_STAGING_DIRS),
            default_bin_location: mock.bin_location.clone(),
        }
    }

    /// The preconfigured `[persistence]` connection: its URL and options.
    ///
    /// `mockPort`, `binLocation` and `tempFolder` are filled from `[mock]`
    /// when `[persistence.options]` does not set them.
    pub fn connection_options(&self) -> Result<(String, Options), ConfigError> {
        let persistence = &self.persistence;
        let url = persistence.url.clone().ok_or(ConfigError::MissingUrl)?;

        let mut options: Options = persistence.options.clone();
        let mut fill = |key: OptionKey, value: Option<String>| {
            if let Some(value) = value {
                options.entry(key.as_str().to_string()).or_insert(value);
            }
        };
        fill(OptionKey::User, persistence.user.clone());
        fill(
            OptionKey::Password,
            persistence.password.as_ref().map(|pw| pw.expose().clone()),
        );
        fill(OptionKey::MockPort, self.mock.mock_port.map(|port| port.to_string()));
        fill(
            OptionKey::BinLocation,
            self.mock.bin_location.as_ref().map(|p| p.display().to_string()),
        );
        fill(
            OptionKey::TempFolder,
            self.mock.temp_folder.as_ref().map(|p| p.display().to_string()),
        );

        Ok((url, options))
    }

    /// Fills request options from `[mock]` where the caller left them out.
    pub fn apply_mock_defaults(&self, options: &mut Options) {
        let defaults = [
            (OptionKey::MockPort, self.mock.mock_port.map(|port| port.to_string())),
            (
                OptionKey::TempFolder,
                self.mock.temp_folder.as_ref().map(|p| p.display().to_string()),
            ),
        ];
        for (key, value) in defaults {
            if let Some(value) = value {
                options.entry(key.as_str().to_string()).or_insert(value);
            }
        }
    }
}

fn default_bootstrap_settle_ms() -> u64 {
    DEFAULT_BOOTSTRAP_SETTLE_MS
}

fn default_relaunch_settle_ms() -> u64 {
    DEFAULT_RELAUNCH_SETTLE_MS
}

fn default_benign_stderr() -> Vec<String> {
    vec!["Using a password".to_string()]
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadConfigFileError),

    /// `[persistence]` has no `url`
    #[error("missing required config 'persistence.url'")]
    MissingUrl,
}
