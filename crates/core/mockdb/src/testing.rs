//! Test doubles for the external tools and the real driver.

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use flate2::{Compression, write::GzEncoder};
use fs_err as fs;
use parking_lot::Mutex;

use crate::{
    builder::{BuilderSettings, Readiness},
    driver::{BoxError, Driver, DriverProperty},
    instance::{ConnectionTarget, DaemonProcess, MockedInstance},
    invoker::{ChildHandle, Invocation, InvokeError, ToolInvoker, ToolOutput},
    options::Options,
    resolver::MockKey,
    snapshot::{self, Snapshot},
    staging::StagingLayout,
    template::TemplateSource,
    tools::Tool,
};

/// What the fake dump tool prints unless told otherwise.
pub const FAKE_DUMP_OUTPUT: &str = "CREATE TABLE t (id INT);\n";

/// Records every invocation and answers with canned outputs.
///
/// Each tool answers from its own queue; the last queued output repeats.
/// Tools without a queue succeed silently, except the dump tool, which
/// prints [`FAKE_DUMP_OUTPUT`].
#[derive(Debug, Default)]
pub struct FakeInvoker {
    invocations: Mutex<Vec<Invocation>>,
    loaded_scripts: Mutex<Vec<String>>,
    outputs: Mutex<HashMap<String, VecDeque<ToolOutput>>>,
    delays: Mutex<HashMap<String, Duration>>,
    children: Mutex<Vec<Arc<AtomicBool>>>,
    next_pid: AtomicU32,
}

impl FakeInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `output` as the next answer of `tool`.
    pub fn with_output(self, tool: Tool, output: ToolOutput) -> Self {
        self.outputs
            .lock()
            .entry(tool.name().to_string())
            .or_default()
            .push_back(output);
        self
    }

    /// Makes every run of `tool` block for `delay` first.
    pub fn with_delay(self, tool: Tool, delay: Duration) -> Self {
        self.delays.lock().insert(tool.name().to_string(), delay);
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    /// Number of recorded invocations of `tool`.
    pub fn count(&self, tool: Tool) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|invocation| invocation.tool_name() == tool.name())
            .count()
    }

    /// Contents of every file redirected into standard input, in order.
    pub fn loaded_scripts(&self) -> Vec<String> {
        self.loaded_scripts.lock().clone()
    }

    /// Spawned children that have not been terminated.
    pub fn running_children(&self) -> usize {
        self.children
            .lock()
            .iter()
            .filter(|running| running.load(Ordering::SeqCst))
            .count()
    }

    fn next_output(&self, name: &str) -> ToolOutput {
        let mut outputs = self.outputs.lock();
        match outputs.get_mut(name) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None if name == Tool::Dump.name() => ToolOutput {
                status: Some(0),
                stdout: FAKE_DUMP_OUTPUT.to_string(),
                stderr: String::new(),
            },
            None => ToolOutput {
                status: Some(0),
                ..Default::default()
            },
        }
    }
}

impl ToolInvoker for FakeInvoker {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, InvokeError> {
        self.invocations.lock().push(invocation.clone());

        let name = invocation.tool_name();
        let delay = self.delays.lock().get(&name).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if let Some(path) = invocation.stdin() {
            let script = std::fs::read_to_string(path).map_err(|source| InvokeError::OpenStdin {
                path: path.to_path_buf(),
                source,
            })?;
            self.loaded_scripts.lock().push(script);
        }

        Ok(self.next_output(&name))
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn ChildHandle>, InvokeError> {
        self.invocations.lock().push(invocation.clone());

        let running = Arc::new(AtomicBool::new(true));
        self.children.lock().push(running.clone());

        Ok(Box::new(FakeChild {
            pid: 10_000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            running,
        }))
    }
}

/// A pretend child process that runs until terminated.
#[derive(Debug)]
pub struct FakeChild {
    pid: u32,
    running: Arc<AtomicBool>,
}

impl ChildHandle for FakeChild {
    fn id(&self) -> Option<u32> {
        self.running.load(Ordering::SeqCst).then_some(self.pid)
    }

    fn wait(&mut self) -> Result<Option<i32>, InvokeError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(Some(0))
    }

    fn terminate(&mut self) -> Result<(), InvokeError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// An instance for `key` that was never provisioned, served by a [`FakeChild`].
pub fn fake_instance(key: &MockKey, port: u16) -> MockedInstance {
    MockedInstance::new(
        key.clone(),
        ConnectionTarget::new(port, key.database()),
        Snapshot {
            command: Invocation::new(Tool::Dump.name()),
            ddl: snapshot::compose_ddl(key.database(), FAKE_DUMP_OUTPUT),
        },
        StagingLayout::new(std::env::temp_dir().join("mockdb-fake")),
        DaemonProcess::new(
            Box::new(FakeChild {
                pid: 1,
                running: Arc::new(AtomicBool::new(true)),
            }),
            port,
        ),
    )
}

/// Creates empty stand-ins for the four tools in a fresh directory.
pub fn fake_bin_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tool directory should be created");
    for tool in Tool::ALL {
        fs::write(dir.path().join(tool.name()), "").expect("tool stub should be written");
    }
    dir
}

/// Settings with no settling delays and a fresh staging directory per build.
pub fn fast_settings(bin_location: &Path) -> BuilderSettings {
    BuilderSettings {
        bootstrap_settle: Duration::ZERO,
        relaunch_settle: Duration::ZERO,
        readiness: Readiness::FixedDelay,
        template: TemplateSource::Embedded,
        benign_stderr: Default::default(),
        keep_staging: false,
        default_bin_location: Some(bin_location.to_path_buf()),
    }
}

/// Writes a gzip'd tar data-directory template holding `entries`.
pub fn write_template_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).expect("archive file should be created");
    let gz = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(gz);
    for (name, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *contents)
            .expect("entry should be appended");
    }
    builder
        .into_inner()
        .expect("tar stream should finish")
        .finish()
        .expect("gzip stream should finish");
}

/// Options every resolvable test request needs.
pub fn mock_options(mock_port: u16) -> Options {
    Options::from([("mockPort".to_string(), mock_port.to_string())])
}

/// A connection handed out by [`FakeDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeConnection {
    pub target: ConnectionTarget,
    pub options: Options,
}

/// Records connections instead of opening them.
#[derive(Debug, Default)]
pub struct FakeDriver {
    connections: Mutex<Vec<FakeConnection>>,
}

impl FakeDriver {
    pub fn connections(&self) -> Vec<FakeConnection> {
        self.connections.lock().clone()
    }
}

impl Driver for FakeDriver {
    type Connection = FakeConnection;

    fn connect(
        &self,
        target: &ConnectionTarget,
        options: &Options,
    ) -> Result<Self::Connection, BoxError> {
        let connection = FakeConnection {
            target: target.clone(),
            options: options.clone(),
        };
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("mysql://")
    }

    fn major_version(&self) -> u32 {
        8
    }

    fn minor_version(&self) -> u32 {
        4
    }

    fn property_info(&self, _options: &Options) -> Vec<DriverProperty> {
        Vec::new()
    }
}
