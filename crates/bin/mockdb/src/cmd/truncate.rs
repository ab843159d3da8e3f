//! Truncation command.
//!
//! Empties every base table of a running mock instance so a test suite can
//! start from the bare schema again, then runs the given follow-up queries
//! (for example to re-seed lookup tables).

use anyhow::Context as _;
use mockdb::{
    ConnectionTarget, Driver as _, Options, SqlxMySqlDriver, driver::MOCK_USER, truncate_database,
};

/// Command-line arguments for the `truncate` command.
#[derive(Debug, clap::Args)]
pub struct Args {
    /// Port the mock instance listens on
    #[arg(long, env = "MOCKDB_MOCK_PORT")]
    pub mock_port: u16,

    /// Database to truncate
    #[arg(value_name = "DATABASE")]
    pub database: String,

    /// Statement to run after truncation, may be repeated
    #[arg(long = "after", value_name = "SQL")]
    pub after_queries: Vec<String>,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    let target = ConnectionTarget::new(args.mock_port, args.database);

    tokio::task::spawn_blocking(move || truncate(&target, &args.after_queries))
        .await
        .context("truncation task panicked")?
}

fn truncate(target: &ConnectionTarget, after_queries: &[String]) -> anyhow::Result<()> {
    let driver = SqlxMySqlDriver::new().context("failed to start driver runtime")?;
    let options = Options::from([("user".to_string(), MOCK_USER.to_string())]);

    let mut session = driver
        .connect(target, &options)
        .map_err(|err| anyhow::anyhow!(err))
        .with_context(|| format!("failed to connect to {target}"))?;

    truncate_database(&mut session, after_queries)
        .with_context(|| format!("failed to truncate {}", target.database()))?;
    session.close().context("failed to close connection")?;

    tracing::info!(%target, "truncated mock database");
    Ok(())
}
