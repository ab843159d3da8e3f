//! External tool invocation.
//!
//! The builder never touches [`std::process`] directly. It describes each tool
//! run as an [`Invocation`] and hands it to a [`ToolInvoker`], which either runs
//! it to completion ([`ToolInvoker::run`]) or starts it as a long-running child
//! ([`ToolInvoker::spawn`]). [`SystemInvoker`] is the real implementation; tests
//! substitute a recording fake.
//!
//! No invocation is time-bounded: a hung tool hangs the calling build.

use std::{
    io::{BufRead as _, BufReader, Read},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::Arc,
    time::Duration,
};

/// How long [`SystemChild::terminate`] waits after SIGTERM before escalating to SIGKILL.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for a terminated child to exit.
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One run of an external executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<String>,
    stdin: Option<PathBuf>,
    detached: bool,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            detached: false,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Redirects the file at `path` into the process' standard input.
    #[must_use]
    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Starts the process in its own process group, so terminal signals aimed
    /// at the parent do not reach it.
    #[must_use]
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn stdin(&self) -> Option<&Path> {
        self.stdin.as_deref()
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Executable name without directory or platform suffix, e.g. `mysqldump`.
    pub fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Shell-like rendering for logs. Inline passwords (`-pSECRET`) are masked.
impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.starts_with("-p") && arg.len() > 2 {
                f.write_str(" -p<redacted>")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        if let Some(stdin) = &self.stdin {
            write!(f, " < {}", stdin.display())?;
        }
        Ok(())
    }
}

/// Captured result of a completed invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Non-blank standard error lines.
    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        self.stderr.lines().filter(|line| !line.trim().is_empty())
    }
}

/// Runs external tools on behalf of the mock builder.
pub trait ToolInvoker: Send + Sync {
    /// Runs the invocation to completion, capturing stdout and stderr.
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, InvokeError>;

    /// Starts the invocation as a long-running child process.
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn ChildHandle>, InvokeError>;
}

impl<T: ToolInvoker + ?Sized> ToolInvoker for Arc<T> {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, InvokeError> {
        (**self).run(invocation)
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn ChildHandle>, InvokeError> {
        (**self).spawn(invocation)
    }
}

/// Ownership of a spawned child process.
pub trait ChildHandle: Send + std::fmt::Debug {
    /// OS process id, `None` once the child has been reaped.
    fn id(&self) -> Option<u32>;

    /// Blocks until the child exits and returns its exit code.
    fn wait(&mut self) -> Result<Option<i32>, InvokeError>;

    /// Stops the child and reaps it. Calling it on an exited child is a no-op.
    fn terminate(&mut self) -> Result<(), InvokeError>;
}

/// Runs tools as real operating-system processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInvoker;

impl SystemInvoker {
    fn command(invocation: &Invocation) -> Result<Command, InvokeError> {
        let mut cmd = Command::new(invocation.program());
        cmd.args(invocation.args());

        match invocation.stdin() {
            Some(path) => {
                let file = std::fs::File::open(path).map_err(|source| InvokeError::OpenStdin {
                    path: path.to_path_buf(),
                    source,
                })?;
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }

        #[cfg(unix)]
        if invocation.is_detached() {
            use std::os::unix::process::CommandExt as _;
            cmd.process_group(0);
        }

        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        Ok(cmd)
    }
}

impl ToolInvoker for SystemInvoker {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, InvokeError> {
        tracing::debug!(command = %invocation, "running external tool");

        let output = Self::command(invocation)?
            .output()
            .map_err(|source| InvokeError::Spawn {
                program: invocation.program().to_path_buf(),
                source,
            })?;

        Ok(ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn ChildHandle>, InvokeError> {
        tracing::debug!(command = %invocation, "spawning external tool");

        let mut child = Self::command(invocation)?
            .spawn()
            .map_err(|source| InvokeError::Spawn {
                program: invocation.program().to_path_buf(),
                source,
            })?;

        // Forward output to tracing. Readers end on EOF once the child exits.
        let name = invocation.tool_name();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(format!("{name}-stdout"), stdout, |line| {
                tracing::info!(target: "mysqld", "{line}");
            });
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(format!("{name}-stderr"), stderr, |line| {
                tracing::warn!(target: "mysqld", "{line}");
            });
        }

        Ok(Box::new(SystemChild {
            child,
            program: invocation.program().to_path_buf(),
            reaped: false,
        }))
    }
}

fn forward_lines<R, F>(thread_name: String, reader: R, log: F)
where
    R: Read + Send + 'static,
    F: Fn(&str) + Send + 'static,
{
    let spawned = std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            for line in BufReader::new(reader).lines().map_while(Result::ok) {
                log(&line);
            }
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "failed to start output forwarding thread");
    }
}

/// A child process started by [`SystemInvoker`].
///
/// Dropping a still-running child terminates it.
#[derive(Debug)]
pub struct SystemChild {
    child: Child,
    program: PathBuf,
    reaped: bool,
}

impl SystemChild {
    fn wait_error(&self, source: std::io::Error) -> InvokeError {
        InvokeError::Wait {
            program: self.program.clone(),
            source,
        }
    }

    /// Polls for exit until `timeout` elapses. Returns whether the child exited.
    #[cfg_attr(not(unix), allow(dead_code))]
    fn wait_timeout(&mut self, timeout: Duration) -> Result<bool, InvokeError> {
        let polls = timeout.as_millis() / TERMINATE_POLL_INTERVAL.as_millis();
        for _ in 0..polls {
            match self.child.try_wait() {
                Ok(Some(_)) => return Ok(true),
                Ok(None) => std::thread::sleep(TERMINATE_POLL_INTERVAL),
                Err(err) => return Err(self.wait_error(err)),
            }
        }
        Ok(false)
    }

    #[cfg(unix)]
    fn send_sigterm(&self) -> Result<(), InvokeError> {
        let pid = self.child.id();
        let nix_pid = i32::try_from(pid)
            .map(nix::unistd::Pid::from_raw)
            .map_err(|_| InvokeError::Signal {
                pid,
                source: nix::errno::Errno::ESRCH,
            })?;
        match nix::sys::signal::kill(nix_pid, nix::sys::signal::Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(source) => Err(InvokeError::Signal { pid, source }),
        }
    }
}

impl ChildHandle for SystemChild {
    fn id(&self) -> Option<u32> {
        (!self.reaped).then(|| self.child.id())
    }

    fn wait(&mut self) -> Result<Option<i32>, InvokeError> {
        let status = self.child.wait().map_err(|err| self.wait_error(err))?;
        self.reaped = true;
        Ok(status.code())
    }

    fn terminate(&mut self) -> Result<(), InvokeError> {
        if self.reaped {
            return Ok(());
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            self.reaped = true;
            return Ok(());
        }

        let pid = self.child.id();
        tracing::debug!(pid, program = %self.program.display(), "terminating child process");

        #[cfg(unix)]
        {
            self.send_sigterm()?;
            if self.wait_timeout(TERMINATE_TIMEOUT)? {
                self.reaped = true;
                return Ok(());
            }
            tracing::warn!(
                pid,
                "child did not exit within {}s after SIGTERM, sending SIGKILL",
                TERMINATE_TIMEOUT.as_secs()
            );
        }

        if let Err(err) = self.child.kill() {
            tracing::debug!(pid, error = %err, "kill failed, child already gone");
        }
        self.child.wait().map_err(|err| self.wait_error(err))?;
        self.reaped = true;
        Ok(())
    }
}

impl Drop for SystemChild {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            tracing::warn!(error = %err, "failed to terminate child process on drop");
        }
    }
}

/// Errors raised while running external tools
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("failed to start '{}'", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open '{}' as standard input", path.display())]
    OpenStdin {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{}' to exit", program.display())]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[cfg(unix)]
    #[error("failed to signal process {pid}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_masks_inline_password() {
        //* Given
        let invocation = Invocation::new("/opt/mysql/bin/mysqldump")
            .arg("-u")
            .arg("app")
            .arg("-ps3cret")
            .arg("-P")
            .arg("3306");

        //* When
        let rendered = invocation.to_string();

        //* Then
        assert_eq!(
            rendered,
            "/opt/mysql/bin/mysqldump -u app -p<redacted> -P 3306"
        );
        assert_eq!(invocation.args()[2], "-ps3cret");
    }

    #[test]
    fn tool_name_drops_directory_and_suffix() {
        assert_eq!(Invocation::new("/opt/bin/mysqld.exe").tool_name(), "mysqld");
        assert_eq!(Invocation::new("mysql_upgrade").tool_name(), "mysql_upgrade");
    }

    #[test]
    fn stderr_lines_skips_blank_lines() {
        let output = ToolOutput {
            status: Some(0),
            stdout: String::new(),
            stderr: "\nwarning one\n   \nwarning two\n".to_string(),
        };

        assert_eq!(
            output.stderr_lines().collect::<Vec<_>>(),
            ["warning one", "warning two"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn system_invoker_run_captures_output_and_stdin() {
        //* Given
        let tmp = tempfile::tempdir().expect("tempdir should be created");
        let input = tmp.path().join("input.sql");
        fs_err::write(&input, "CREATE TABLE t (id INT);\n").expect("input should be written");
        let invocation = Invocation::new("/bin/cat").stdin_file(&input);

        //* When
        let output = SystemInvoker
            .run(&invocation)
            .expect("cat should run to completion");

        //* Then
        assert!(output.success());
        assert_eq!(output.stdout, "CREATE TABLE t (id INT);\n");
        assert_eq!(output.stderr_lines().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn system_invoker_spawned_child_terminates() {
        //* Given
        let invocation = Invocation::new("/bin/sleep").arg("30").detached();
        let mut child = SystemInvoker
            .spawn(&invocation)
            .expect("sleep should spawn");
        assert!(child.id().is_some());

        //* When
        child.terminate().expect("terminate should stop the child");

        //* Then
        assert_eq!(child.id(), None, "terminated child should be reaped");
        child.terminate().expect("second terminate should be a no-op");
    }

    #[test]
    fn system_invoker_run_reports_missing_program() {
        let result = SystemInvoker.run(&Invocation::new("/nonexistent/mysqldump"));

        assert!(
            matches!(result, Err(InvokeError::Spawn { .. })),
            "expected Spawn error, got {result:?}"
        );
    }
}
