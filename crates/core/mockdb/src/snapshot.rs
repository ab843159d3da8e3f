//! Schema snapshots of the reference database.
//!
//! Runs the dump tool in structure-only mode and turns its output into a DDL
//! script that can be replayed on an instance with nothing but a `root`
//! account:
//!
//! 1. `DROP DATABASE IF EXISTS <db>`, `CREATE DATABASE <db>` and `USE <db>` are
//!    prepended;
//! 2. every `DEFINER=<user>@<host>` clause is rewritten to
//!    ``DEFINER=`root`@`localhost` ``.

use std::sync::LazyLock;

use regex::Regex;

use crate::{
    invoker::{Invocation, InvokeError, ToolInvoker},
    resolver::ResolvedRequest,
};

/// Definer every routine, view, trigger and event is reassigned to.
pub const SANITIZED_DEFINER: &str = "DEFINER=`root`@`localhost`";

// Matches quoted (backtick or single quote) or bare account and host names.
static DEFINER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"DEFINER=(?:`[^`]*`|'[^']*'|[A-Za-z0-9._%$-]+)@(?:`[^`]*`|'[^']*'|[A-Za-z0-9._%:-]+)",
    )
    .expect("definer pattern should compile")
});

/// Decides which standard-error lines of the dump tool are harmless.
///
/// The dump tool warns on every run that passes the password on the command
/// line; such lines must not fail the snapshot. The patterns are
/// engine-specific, hence configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenignStderr {
    patterns: Vec<String>,
}

impl BenignStderr {
    /// Lines containing any of `patterns` are benign.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_benign(&self, line: &str) -> bool {
        self.patterns.iter().any(|pattern| line.contains(pattern))
    }
}

impl Default for BenignStderr {
    fn default() -> Self {
        Self::new(["Using a password"])
    }
}

/// A captured, sanitized schema snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The exact dump invocation that produced the snapshot
    pub command: Invocation,
    /// Replayable DDL script
    pub ddl: String,
}

/// Builds the dump invocation for `request`.
///
/// Argument order is fixed: host, port, user, password (inline, `-pSECRET`),
/// structure-only flags, database name.
pub fn dump_invocation(dump_tool: &std::path::Path, request: &ResolvedRequest) -> Invocation {
    let mut invocation = Invocation::new(dump_tool);

    if !request.reference_host.is_empty() {
        invocation = invocation.arg("-h").arg(&request.reference_host);
    }
    if let Some(port) = request.reference_port {
        invocation = invocation.arg("-P").arg(port.to_string());
    }
    if let Some(user) = request.user.as_deref().filter(|user| !user.is_empty()) {
        invocation = invocation.arg("-u").arg(user);
    }
    if let Some(password) = request.password.as_ref().filter(|pw| !pw.is_empty()) {
        invocation = invocation.arg(format!("-p{}", password.expose()));
    }

    invocation
        .arg("--routines=true")
        .arg("--events")
        .arg("-d")
        .arg(&request.database_name)
}

/// Runs the dump and assembles the replayable DDL.
pub fn take(
    invoker: &dyn ToolInvoker,
    command: Invocation,
    database: &str,
    benign: &BenignStderr,
) -> Result<Snapshot, SnapshotError> {
    tracing::info!(command = %command, "taking schema snapshot");

    let output = invoker.run(&command).map_err(SnapshotError::Invoke)?;

    let mut rejected = Vec::new();
    for line in output.stderr_lines() {
        if benign.is_benign(line) {
            tracing::debug!(target: "mysqldump", "{line}");
        } else {
            tracing::warn!(target: "mysqldump", "{line}");
            rejected.push(line);
        }
    }

    if !rejected.is_empty() {
        return Err(SnapshotError::ToolReportedError {
            command: command.to_string(),
            output: rejected.join("\n"),
        });
    }

    if !output.success() {
        return Err(SnapshotError::NonZeroExit {
            command: command.to_string(),
            status: output.status,
            output: output.stdout,
        });
    }

    let ddl = compose_ddl(database, &output.stdout);

    tracing::debug!(bytes = ddl.len(), "schema snapshot captured");

    Ok(Snapshot { command, ddl })
}

/// Prepends the database reset statements to `dump` and sanitizes definers.
pub fn compose_ddl(database: &str, dump: &str) -> String {
    let mut script = format!(
        "DROP DATABASE IF EXISTS {database};\n\n\
         CREATE DATABASE {database};\n\n\
         USE {database};\n\n"
    );
    for line in dump.lines() {
        script.push_str(line);
        script.push('\n');
    }
    sanitize_definers(&script).trim().to_string()
}

/// Rewrites every `DEFINER=<user>@<host>` clause to [`SANITIZED_DEFINER`].
pub fn sanitize_definers(ddl: &str) -> String {
    DEFINER_REGEX
        .replace_all(ddl, regex::NoExpand(SANITIZED_DEFINER))
        .into_owned()
}

/// Errors raised while snapshotting the reference schema
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to run the dump tool")]
    Invoke(#[source] InvokeError),

    /// The dump tool wrote non-benign lines to standard error
    #[error("error from dump procedure `{command}`:\n\n{output}")]
    ToolReportedError { command: String, output: String },

    #[error("dump procedure `{command}` exited with status {status:?}:\n\n{output}")]
    NonZeroExit {
        command: String,
        status: Option<i32>,
        output: String,
    },
}
