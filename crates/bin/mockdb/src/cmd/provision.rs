//! Mock provisioning command.
//!
//! Provisions the ephemeral instance for a connection string by:
//! 1. Resolving the connection string against the options and configuration
//! 2. Snapshotting the reference schema and bootstrapping the instance
//! 3. Printing the rewritten connection target
//! 4. Holding the instance until Ctrl-C, then shutting it down
//!
//! # Configuration
//!
//! - Config file: `--config` flag or `MOCKDB_CONFIG` env var
//! - Overrides: `MOCKDB_CONFIG_*` env vars, e.g. `MOCKDB_CONFIG_MOCK__MOCK_PORT=3307`
//! - Logging: `MOCKDB_LOG` env var (`error`, `warn`, `info`, `debug`, `trace`)

use std::sync::Arc;

use anyhow::Context as _;
use mockdb::{
    MOCK_URL_PREFIX, MockDriver, MockService, Options, SqlSession as _, SqlxMySqlDriver,
};

use crate::args::ConnectionArgs;

/// Command-line arguments for the `provision` command.
#[derive(Debug, clap::Args)]
pub struct Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Connect to the instance once it is up and list its tables
    #[arg(long)]
    pub verify: bool,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.connection.load_config()?;
    let (url, options) = args.connection.connection(&config)?;

    let service = Arc::new(MockService::new(config.builder_settings()));
    let request = service
        .resolve(&url, &options)
        .with_context(|| format!("failed to resolve '{url}'"))?
        .with_context(|| format!("'{url}' is not a {MOCK_URL_PREFIX} connection string"))?;

    tracing::info!(
        mock_key = %request.mock_key,
        mock_port = request.mock_port,
        "provisioning mock instance"
    );

    let instance = tokio::task::spawn_blocking({
        let service = service.clone();
        move || service.get_or_build(&request)
    })
    .await
    .context("provisioning task panicked")?
    .context("failed to provision mock instance")?;

    if args.verify {
        let tables = tokio::task::spawn_blocking({
            let service = service.clone();
            move || verify(service, &url, &options)
        })
        .await
        .context("verification task panicked")??;
        tracing::info!(tables = ?tables, "mock instance accepts connections");
    }

    println!("{}", instance.target());
    tracing::info!(
        target = %instance.target(),
        pid = ?instance.daemon_pid(),
        staging = %instance.staging().root().display(),
        "mock instance ready, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("shutting down mock instances");
    tokio::task::spawn_blocking(move || service.shutdown())
        .await
        .context("shutdown task panicked")?;

    Ok(())
}

/// Opens a connection through the interception layer and lists the tables
/// the schema load created.
fn verify(service: Arc<MockService>, url: &str, options: &Options) -> anyhow::Result<Vec<String>> {
    let inner = SqlxMySqlDriver::new().context("failed to start driver runtime")?;
    let driver = MockDriver::new(service, inner);

    let mut session = driver
        .connect(url, options)
        .context("failed to connect to mock instance")?
        .context("connection string was not intercepted")?;

    let database = session.database().to_string();
    let tables = session
        .base_tables(&database)
        .context("failed to list tables")?;
    session.close().context("failed to close connection")?;

    Ok(tables)
}
