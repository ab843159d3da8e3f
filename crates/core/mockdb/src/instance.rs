//! Provisioned ephemeral instances.

use parking_lot::Mutex;

use crate::{
    invoker::{ChildHandle, Invocation, InvokeError},
    resolver::MockKey,
    snapshot::Snapshot,
    staging::StagingLayout,
};

/// Host every ephemeral instance listens on.
pub const MOCK_HOST: &str = "localhost";

/// Address clients connect to instead of the reference database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTarget {
    host: String,
    port: u16,
    database: String,
}

impl ConnectionTarget {
    /// Target on [`MOCK_HOST`].
    pub fn new(port: u16, database: impl Into<String>) -> Self {
        Self {
            host: MOCK_HOST.to_string(),
            port,
            database: database.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

/// Renders as `mysql://localhost:<port>/<database>`.
impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mysql://{}:{}/{}", self.host, self.port, self.database)
    }
}

/// The long-running server daemon of one instance.
///
/// Dropping the handle terminates the daemon.
#[derive(Debug)]
pub struct DaemonProcess {
    child: Box<dyn ChildHandle>,
    port: u16,
}

impl DaemonProcess {
    pub fn new(child: Box<dyn ChildHandle>, port: u16) -> Self {
        Self { child, port }
    }

    /// OS process id, `None` once the daemon has exited and been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops the daemon: SIGTERM, a bounded wait, then SIGKILL.
    pub fn terminate(&mut self) -> Result<(), InvokeError> {
        if let Some(pid) = self.child.id() {
            tracing::info!(pid, port = self.port, "stopping server daemon");
        }
        self.child.terminate()
    }

    /// Blocks until the daemon exits on its own.
    pub fn wait(&mut self) -> Result<Option<i32>, InvokeError> {
        self.child.wait()
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if let Err(err) = self.child.terminate() {
            tracing::warn!(port = self.port, error = %err, "failed to stop server daemon on drop");
        }
    }
}

/// Descriptor of a provisioned ephemeral database.
///
/// Immutable once built, except for the daemon handle, which
/// [`MockedInstance::terminate`] releases.
#[derive(Debug)]
pub struct MockedInstance {
    mock_key: MockKey,
    target: ConnectionTarget,
    snapshot: Snapshot,
    staging: StagingLayout,
    daemon: Mutex<Option<DaemonProcess>>,
}

impl MockedInstance {
    pub fn new(
        mock_key: MockKey,
        target: ConnectionTarget,
        snapshot: Snapshot,
        staging: StagingLayout,
        daemon: DaemonProcess,
    ) -> Self {
        Self {
            mock_key,
            target,
            snapshot,
            staging,
            daemon: Mutex::new(Some(daemon)),
        }
    }

    pub fn mock_key(&self) -> &MockKey {
        &self.mock_key
    }

    /// Where clients should connect instead of the reference database.
    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn database_name(&self) -> &str {
        self.target.database()
    }

    /// The dump invocation that produced the schema snapshot.
    pub fn snapshot_command(&self) -> &Invocation {
        &self.snapshot.command
    }

    /// The sanitized DDL loaded into the instance.
    pub fn snapshot_ddl(&self) -> &str {
        &self.snapshot.ddl
    }

    pub fn staging(&self) -> &StagingLayout {
        &self.staging
    }

    /// Pid of the serving daemon, if it is still owned and running.
    pub fn daemon_pid(&self) -> Option<u32> {
        self.daemon.lock().as_ref().and_then(DaemonProcess::id)
    }

    /// Stops the serving daemon. Later calls are no-ops.
    pub fn terminate(&self) -> Result<(), InvokeError> {
        match self.daemon.lock().take() {
            Some(mut daemon) => daemon.terminate(),
            None => Ok(()),
        }
    }
}
