use clap::Parser as _;

mod args;
mod cmd;

#[tokio::main]
async fn main() {
    monitoring::logging::init();

    if let Err(err) = run().await {
        eprintln!("error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
        std::process::exit(1);
    }
}

/// Disposable MySQL instances standing in for a reference database
#[derive(Debug, clap::Parser)]
#[command(name = "mockdb")]
#[command(about = "mockdb provisions schema-only MySQL instances from mysql+mock:// connection strings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Show how a connection string resolves
    ///
    /// Parses a mysql+mock:// connection string together with the supplied
    /// options and prints the normalized request and its mock key. Nothing
    /// is provisioned.
    Resolve(cmd::resolve::Args),

    /// Provision a mock instance and keep it running
    ///
    /// Snapshots the reference schema, bootstraps a private mysqld on the
    /// mock port and loads the schema into it. The instance stays up until
    /// the process receives Ctrl-C.
    Provision(cmd::provision::Args),

    /// Empty every table of a running mock instance
    Truncate(cmd::truncate::Args),
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Resolve(args) => cmd::resolve::run(args)?,
        Commands::Provision(args) => cmd::provision::run(args).await?,
        Commands::Truncate(args) => cmd::truncate::run(args).await?,
    }

    Ok(())
}
