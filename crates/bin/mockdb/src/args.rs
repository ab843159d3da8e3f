//! Shared command-line arguments for commands that take a connection string.

use std::path::PathBuf;

use anyhow::Context as _;
use mockdb::Options;
use mockdb_config::MockDbConfig;

/// The connection string, its options and the configuration file.
///
/// Commands include these with `#[command(flatten)]`.
#[derive(Debug, clap::Args)]
pub struct ConnectionArgs {
    /// The mysql+mock:// connection string
    ///
    /// Defaults to `persistence.url` from the configuration file.
    #[arg(value_name = "URL")]
    pub url: Option<String>,

    /// Connection option as KEY=VALUE, may be repeated
    ///
    /// Examples: -o mockPort=3307 -o user=app -o binLocation=/usr/local/mysql/bin
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
    pub options: Vec<(String, String)>,

    /// Path to the TOML configuration file
    #[arg(long, env = "MOCKDB_CONFIG")]
    pub config: Option<PathBuf>,
}

impl ConnectionArgs {
    pub fn load_config(&self) -> anyhow::Result<MockDbConfig> {
        mockdb_config::load(self.config.as_deref()).context("failed to load configuration")
    }

    /// The connection string and options to resolve.
    ///
    /// Without a URL argument, the `[persistence]` connection is used.
    /// Options given on the command line win over configured ones.
    pub fn connection(&self, config: &MockDbConfig) -> anyhow::Result<(String, Options)> {
        let (url, mut options) = match &self.url {
            Some(url) => (url.clone(), Options::new()),
            None => config
                .connection_options()
                .context("no connection string given and none configured")?,
        };

        options.extend(self.options.iter().cloned());
        config.apply_mock_defaults(&mut options);

        Ok((url, options))
    }
}

fn parse_option(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{arg}'")),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_option_splits_on_first_equals() {
        let parsed = parse_option("password=a=b").expect("option should parse");

        assert_eq!(parsed, ("password".to_string(), "a=b".to_string()));
    }

    #[test]
    fn parse_option_rejects_missing_key() {
        assert!(parse_option("=3307").is_err());
        assert!(parse_option("mockPort").is_err());
    }

    #[test]
    fn command_line_options_override_configured_ones() {
        //* Given
        let mut config = MockDbConfig::default();
        config.persistence.url = Some("mysql+mock://db.internal/shop".to_string());
        config.persistence.user = Some("app".to_string());
        config.mock.mock_port = Some(3307);
        let args = ConnectionArgs {
            url: None,
            options: vec![("user".to_string(), "ops".to_string())],
            config: None,
        };

        //* When
        let (url, options) = args
            .connection(&config)
            .expect("configured connection should be used");

        //* Then
        assert_eq!(url, "mysql+mock://db.internal/shop");
        assert_eq!(options["user"], "ops");
        assert_eq!(options["mockPort"], "3307");
    }

    #[test]
    fn missing_url_without_configuration_fails() {
        let args = ConnectionArgs {
            url: None,
            options: Vec::new(),
            config: None,
        };

        let result = args.connection(&MockDbConfig::default());

        assert!(result.is_err());
    }
}
