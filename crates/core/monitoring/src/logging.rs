//! A set of utilities to enable logging configuration using tracing_subscriber.

use std::{io::IsTerminal, sync::Once};

use tracing_subscriber::{EnvFilter, filter::LevelFilter, filter::ParseError};

static MOCKDB_LOG_ENV_VAR: &str = "MOCKDB_LOG";

/// Initializes a tracing subscriber for logging.
///
/// `RUST_LOG` directives apply as usual. Every workspace crate not mentioned
/// there logs at the level in `MOCKDB_LOG` (default `info`).
pub fn init() {
    // Tests call this too, so guard against double initialization.
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let (env_filter, log_level) = match env_filter_and_log_level() {
            Ok(filter) => filter,
            Err(err) => {
                eprintln!("invalid log directives, falling back to info: {err}");
                fallback_filter()
            }
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .init();

        tracing::debug!("log level: {}", log_level);
    });
}

/// List of crates in the workspace.
const MOCKDB_CRATES: &[&str] = &["mockdb", "mockdb_cli", "mockdb_config", "monitoring"];

/// Log targets of the external tools, whose output is forwarded line by line.
const TOOL_TARGETS: &[&str] = &["mysqld", "mysqldump", "mysql_upgrade"];

fn env_filter_and_log_level() -> Result<(EnvFilter, String), ParseError> {
    let directive_string = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let log_level = std::env::var(MOCKDB_LOG_ENV_VAR).unwrap_or_else(|_| "info".to_string());
    let env_filter = build_filter(&directive_string, &log_level)?;
    Ok((env_filter, log_level))
}

fn build_filter(directive_string: &str, log_level: &str) -> Result<EnvFilter, ParseError> {
    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::ERROR.into())
        .parse(directive_string)?;

    for target in MOCKDB_CRATES.iter().chain(TOOL_TARGETS) {
        // RUST_LOG wins for targets it mentions
        if !directive_string.contains(&format!("{target}=")) {
            env_filter = env_filter.add_directive(format!("{target}={log_level}").parse()?);
        }
    }

    Ok(env_filter)
}

fn fallback_filter() -> (EnvFilter, String) {
    let env_filter = MOCKDB_CRATES
        .iter()
        .chain(TOOL_TARGETS)
        .filter_map(|target| format!("{target}=info").parse().ok())
        .fold(
            EnvFilter::default().add_directive(LevelFilter::ERROR.into()),
            EnvFilter::add_directive,
        );
    (env_filter, "info".to_string())
}
