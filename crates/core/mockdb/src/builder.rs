//! The mock build pipeline.
//!
//! [`MockBuilder::build`] turns a [`ResolvedRequest`] into a running ephemeral
//! instance, in strict order:
//!
//! 1. reject `mockPort == port` before any side effect;
//! 2. locate the four external tools;
//! 3. prepare the staging directory;
//! 4. snapshot the reference schema;
//! 5. bootstrap the server: unpack the template (initializing the data
//!    directory when the template is only a skeleton), bring up a short-lived
//!    daemon, run the upgrade tool, stop it, relaunch it detached;
//! 6. load the snapshot through the client tool;
//! 7. hand back a [`MockedInstance`] owning the long-lived daemon.
//!
//! Any failure aborts the remaining steps. A daemon started by a failed build
//! is stopped when its handle drops, and the staging root is emptied so a
//! retry can reuse it.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpStream},
    path::PathBuf,
    time::Duration,
};

use backon::{BlockingRetryable as _, ConstantBuilder};
use fs_err as fs;
use parking_lot::Mutex;

use crate::{
    instance::{ConnectionTarget, DaemonProcess, MockedInstance},
    invoker::{Invocation, InvokeError, ToolInvoker},
    resolver::ResolvedRequest,
    snapshot::{self, BenignStderr, SnapshotError},
    staging::{self, ExitCleanup, KEEP_STAGING_DIRS, StagingError, StagingGuard, StagingLayout},
    template::{self, TemplateError, TemplateSource},
    tools::{Tool, ToolError, Toolset},
};

/// Settling delay after the bring-up daemon starts.
pub const DEFAULT_BOOTSTRAP_SETTLE: Duration = Duration::from_millis(2500);

/// Settling delay after the long-lived daemon starts.
pub const DEFAULT_RELAUNCH_SETTLE: Duration = Duration::from_millis(3500);

/// Interval between port probes under [`Readiness::PollPort`].
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the builder decides a freshly started daemon is ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Readiness {
    /// Sleep for the whole settling delay
    #[default]
    FixedDelay,
    /// Probe the mock port until it accepts connections, for at most the
    /// settling delay
    PollPort,
}

/// Tunables of the build pipeline.
#[derive(Debug, Clone)]
pub struct BuilderSettings {
    pub bootstrap_settle: Duration,
    pub relaunch_settle: Duration,
    pub readiness: Readiness,
    pub template: TemplateSource,
    pub benign_stderr: BenignStderr,
    /// Leave staging directories behind at shutdown
    pub keep_staging: bool,
    /// Tool directory used by requests without `binLocation`, before any
    /// request has supplied one
    pub default_bin_location: Option<PathBuf>,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            bootstrap_settle: DEFAULT_BOOTSTRAP_SETTLE,
            relaunch_settle: DEFAULT_RELAUNCH_SETTLE,
            readiness: Readiness::default(),
            template: TemplateSource::default(),
            benign_stderr: BenignStderr::default(),
            keep_staging: *KEEP_STAGING_DIRS,
            default_bin_location: None,
        }
    }
}

/// Provisions ephemeral instances by driving the external tools.
#[derive(Debug)]
pub struct MockBuilder<I> {
    invoker: I,
    settings: BuilderSettings,
    default_bin_location: Mutex<Option<PathBuf>>,
    cleanup: ExitCleanup,
}

impl<I: ToolInvoker> MockBuilder<I> {
    pub fn new(invoker: I, settings: BuilderSettings) -> Self {
        Self {
            invoker,
            default_bin_location: Mutex::new(settings.default_bin_location.clone()),
            cleanup: ExitCleanup::new(settings.keep_staging),
            settings,
        }
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    pub fn settings(&self) -> &BuilderSettings {
        &self.settings
    }

    /// Staged paths awaiting removal at shutdown.
    pub fn cleanup(&self) -> &ExitCleanup {
        &self.cleanup
    }

    /// Tool directory applied to requests that omit `binLocation`.
    pub fn default_bin_location(&self) -> Option<PathBuf> {
        self.default_bin_location.lock().clone()
    }

    /// Runs the whole pipeline for `request`.
    pub fn build(&self, request: &ResolvedRequest) -> Result<MockedInstance, BuildError> {
        let mock_key = &request.mock_key;
        let port = request.mock_port;

        if request.reference_port == Some(port) {
            return Err(BuildError::PortConflict { port });
        }

        let toolset = self.discover_tools(request)?;

        let staging = StagingGuard::new(staging::prepare(request.temp_folder.as_deref())?);
        self.cleanup.register(&staging);
        tracing::info!(%mock_key, staging = %staging.root().display(), "staging directory ready");

        let command = snapshot::dump_invocation(toolset.path(Tool::Dump), request);
        let snapshot = snapshot::take(
            &self.invoker,
            command,
            &request.database_name,
            &self.settings.benign_stderr,
        )?;
        tracing::info!(%mock_key, "schema snapshot taken");

        let daemon = self.bootstrap(&toolset, &staging, port)?;
        tracing::info!(%mock_key, port, "server bootstrapped");

        self.load_schema(&toolset, &staging, port, &snapshot.ddl)?;
        tracing::info!(%mock_key, port, "schema loaded");

        Ok(MockedInstance::new(
            mock_key.clone(),
            ConnectionTarget::new(port, &request.database_name),
            snapshot,
            staging.into_inner(),
            daemon,
        ))
    }

    /// Validates the request's tool directory, or the remembered default.
    ///
    /// The first directory that validates becomes the default.
    fn discover_tools(&self, request: &ResolvedRequest) -> Result<Toolset, BuildError> {
        let mut default_bin_location = self.default_bin_location.lock();

        let bin_location = request
            .bin_location
            .as_ref()
            .or(default_bin_location.as_ref())
            .ok_or(ToolError::MissingBinLocation)?;
        let toolset = Toolset::discover(bin_location)?;

        if default_bin_location.is_none() {
            tracing::info!(
                bin_location = %toolset.bin_location().display(),
                "remembering tool directory as default"
            );
            *default_bin_location = Some(toolset.bin_location().to_path_buf());
        }

        Ok(toolset)
    }

    fn bootstrap(
        &self,
        toolset: &Toolset,
        staging: &StagingLayout,
        port: u16,
    ) -> Result<DaemonProcess, BuildError> {
        let data_dir = staging.data_dir();
        self.settings.template.unpack_into(&data_dir)?;
        if !template::is_initialized(&data_dir) {
            self.initialize_data_dir(toolset, staging)?;
        }

        let server = server_invocation(toolset, staging, port);

        tracing::info!(port, "starting bring-up server");
        let mut bring_up = DaemonProcess::new(
            self.invoker.spawn(&server).map_err(BuildError::Bootstrap)?,
            port,
        );
        self.await_ready(port, self.settings.bootstrap_settle)?;

        let upgrade = Invocation::new(toolset.path(Tool::Upgrade))
            .arg("-u")
            .arg("root")
            .arg(format!("--socket={}", staging.socket().display()))
            .arg("-P")
            .arg(port.to_string())
            .arg("--force");
        tracing::info!(port, command = %upgrade, "upgrading data directory");
        let output = self.invoker.run(&upgrade).map_err(BuildError::Bootstrap)?;
        for line in output.stderr_lines() {
            tracing::debug!(target: "mysql_upgrade", "{line}");
        }
        if !output.success() {
            tracing::warn!(port, status = ?output.status, "upgrade tool exited unsuccessfully");
        }

        bring_up.terminate().map_err(BuildError::Bootstrap)?;
        drop(bring_up);
        remove_artifact(staging.socket());
        remove_artifact(staging.pid_file());

        tracing::info!(port, "starting long-lived server");
        let daemon = DaemonProcess::new(
            self.invoker
                .spawn(&server.detached())
                .map_err(BuildError::Bootstrap)?,
            port,
        );
        if !cfg!(windows) || self.settings.readiness == Readiness::PollPort {
            self.await_ready(port, self.settings.relaunch_settle)?;
        }

        Ok(daemon)
    }

    /// Replaces a skeleton template with a freshly initialized data directory.
    fn initialize_data_dir(
        &self,
        toolset: &Toolset,
        staging: &StagingLayout,
    ) -> Result<(), BuildError> {
        let data_dir = staging.data_dir();
        staging::clear_dir(&data_dir).map_err(BuildError::ClearDataDir)?;

        let initialize = Invocation::new(toolset.path(Tool::Server))
            .arg("--initialize-insecure")
            .arg(format!("--datadir={}", data_dir.display()))
            .arg("--explicit_defaults_for_timestamp");
        tracing::info!(
            data_dir = %data_dir.display(),
            command = %initialize,
            "template holds no system tables, initializing data directory"
        );

        let output = self.invoker.run(&initialize).map_err(BuildError::Bootstrap)?;
        for line in output.stderr_lines() {
            tracing::debug!(target: "mysqld", "{line}");
        }
        if !output.success() {
            return Err(BuildError::Initialize {
                status: output.status,
                output: output.stderr,
            });
        }

        Ok(())
    }

    fn load_schema(
        &self,
        toolset: &Toolset,
        staging: &StagingLayout,
        port: u16,
        ddl: &str,
    ) -> Result<(), BuildError> {
        let dump_file = staging.dump_file();
        fs::write(&dump_file, ddl).map_err(BuildError::WriteDump)?;

        let load = Invocation::new(toolset.path(Tool::Client))
            .arg("-u")
            .arg("root")
            .arg(format!("--socket={}", staging.socket().display()))
            .arg("-P")
            .arg(port.to_string())
            .stdin_file(dump_file);
        tracing::info!(port, command = %load, "loading schema snapshot");

        let output = self.invoker.run(&load).map_err(BuildError::Bootstrap)?;
        if !output.success() {
            return Err(BuildError::Load {
                status: output.status,
                output: output.stderr,
            });
        }

        Ok(())
    }

    fn await_ready(&self, port: u16, settle: Duration) -> Result<(), BuildError> {
        match self.settings.readiness {
            Readiness::FixedDelay => {
                if !settle.is_zero() {
                    tracing::debug!(port, "waiting {}ms for server to settle", settle.as_millis());
                    std::thread::sleep(settle);
                }
                Ok(())
            }
            Readiness::PollPort => wait_for_port(port, settle),
        }
    }
}

/// The daemon command line shared by the bring-up and long-lived launches.
fn server_invocation(toolset: &Toolset, staging: &StagingLayout, port: u16) -> Invocation {
    Invocation::new(toolset.path(Tool::Server))
        .arg("-h")
        .arg(staging.data_dir().display().to_string())
        .arg(format!("--socket={}", staging.socket().display()))
        .arg(format!("--pid-file={}", staging.pid_file().display()))
        .arg("-P")
        .arg(port.to_string())
        .arg("--explicit_defaults_for_timestamp")
}

/// Probes `127.0.0.1:port` until it accepts a connection or `max_wait` elapses.
///
/// Every probe may block for its connect timeout before the retry delay, so
/// the retry count leaves room for both.
fn wait_for_port(port: u16, max_wait: Duration) -> Result<(), BuildError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let (connect_timeout, retries) = poll_budget(max_wait);

    (|| TcpStream::connect_timeout(&addr, connect_timeout).map(drop))
        .retry(
            ConstantBuilder::default()
                .with_delay(READINESS_POLL_INTERVAL)
                .with_max_times(retries),
        )
        .sleep(std::thread::sleep)
        .notify(|err, dur| {
            tracing::debug!(
                port,
                error = %err,
                "server not accepting connections yet, retrying in {:.1}s",
                dur.as_secs_f32()
            );
        })
        .call()
        .map_err(|_| BuildError::Readiness {
            port,
            waited: max_wait,
        })?;

    tracing::debug!(port, "server accepting connections");
    Ok(())
}

/// Connect timeout and retry count of a port poll bounded by `max_wait`.
///
/// One probe plus `retries` probe-and-delay rounds never exceed `max_wait`.
fn poll_budget(max_wait: Duration) -> (Duration, usize) {
    let connect_timeout = READINESS_POLL_INTERVAL
        .min(max_wait)
        .max(Duration::from_millis(1));
    let round = connect_timeout + READINESS_POLL_INTERVAL;
    let retries = max_wait.saturating_sub(connect_timeout).as_millis() / round.as_millis();
    (connect_timeout, retries as usize)
}

fn remove_artifact(path: PathBuf) {
    match std::fs::remove_file(&path) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), error = %err, "failed to remove server artifact");
        }
        _ => {}
    }
}

/// Errors raised by the build pipeline
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The mock would listen on the reference engine's port
    #[error("mockPort and port must differ, both are {port}")]
    PortConflict { port: u16 },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("failed to bootstrap the server")]
    Bootstrap(#[source] InvokeError),

    #[error("failed to clear the data directory before initialization")]
    ClearDataDir(#[source] std::io::Error),

    /// The server could not initialize a data directory from scratch
    #[error(
        "failed to initialize the data directory (exit status {status:?}); \
         set 'mock.template_archive' to an initialized template if mysqld cannot \
         initialize one itself:\n\n{output}"
    )]
    Initialize { status: Option<i32>, output: String },

    #[error("failed to write the schema snapshot")]
    WriteDump(#[source] std::io::Error),

    /// The client tool failed to replay the snapshot
    #[error("failed to load the schema snapshot (exit status {status:?}):\n\n{output}")]
    Load { status: Option<i32>, output: String },

    #[error("server did not accept connections on port {port} within {waited:?}")]
    Readiness { port: u16, waited: Duration },
}
