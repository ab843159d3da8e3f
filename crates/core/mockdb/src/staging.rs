//! Staging directories for ephemeral instances.
//!
//! Each build owns one staging directory:
//!
//! ```text
//! <root>/
//! ├── data/        unpacked template data directory
//! ├── mysql.sock   server socket
//! ├── mysql.pid    server pid file
//! └── dump.sql     sanitized schema snapshot
//! ```
//!
//! The root must be empty (or absent) when the build starts and its path must
//! not contain whitespace. Staged paths are registered with an [`ExitCleanup`]
//! that removes them when the owning service shuts down. While a build is in
//! flight its layout sits in a [`StagingGuard`], which empties the root again
//! if the build fails so the same `tempFolder` can be reused by a retry.

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use fs_err as fs;
use parking_lot::Mutex;

/// Whether staging directories survive service shutdown.
///
/// `false` by default; set `MOCKDB_KEEP_STAGING=1` (or `true`) to keep them for
/// post-mortem inspection.
pub static KEEP_STAGING_DIRS: LazyLock<bool> = LazyLock::new(|| {
    std::env::var("MOCKDB_KEEP_STAGING")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
});

/// Prefix of staging directories created under the system temp directory.
const TEMP_DIR_PREFIX: &str = "mockdb";

/// Paths inside one staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    root: PathBuf,
}

impl StagingLayout {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn socket(&self) -> PathBuf {
        self.root.join("mysql.sock")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("mysql.pid")
    }

    pub fn dump_file(&self) -> PathBuf {
        self.root.join("dump.sql")
    }
}

/// Validates (or creates) the staging root and its data subdirectory.
///
/// With no `temp_folder`, a fresh directory is created under the system temp
/// directory.
pub fn prepare(temp_folder: Option<&Path>) -> Result<StagingLayout, StagingError> {
    let root = match temp_folder {
        Some(path) => path.to_path_buf(),
        None => tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir()
            .map_err(StagingError::CreateTempDir)?
            .keep(),
    };

    if root.to_string_lossy().chars().any(char::is_whitespace) {
        return Err(StagingError::PathContainsWhitespace { path: root });
    }

    match fs::metadata(&root) {
        Ok(metadata) if !metadata.is_dir() => {
            return Err(StagingError::NotADirectory { path: root });
        }
        Ok(_) => {
            let mut entries = fs::read_dir(&root).map_err(StagingError::ReadDir)?;
            if entries.next().is_some() {
                return Err(StagingError::NotEmpty { path: root });
            }
        }
        Err(_) => {}
    }

    let layout = StagingLayout::new(root);
    fs::create_dir_all(layout.data_dir()).map_err(StagingError::CreateDir)?;

    tracing::debug!(staging = %layout.root().display(), "prepared staging directory");

    Ok(layout)
}

/// Empties the staging root of a build that did not complete.
///
/// Dropping an armed guard removes everything below the root; the root itself
/// stays so a caller-supplied `tempFolder` keeps existing. Daemons started by
/// the build must be stopped before the guard drops.
#[derive(Debug)]
pub struct StagingGuard {
    layout: StagingLayout,
    armed: bool,
}

impl StagingGuard {
    pub fn new(layout: StagingLayout) -> Self {
        Self {
            layout,
            armed: true,
        }
    }

    /// Disarms the guard, handing the staged directory to its new owner.
    pub fn into_inner(mut self) -> StagingLayout {
        self.armed = false;
        self.layout.clone()
    }
}

impl std::ops::Deref for StagingGuard {
    type Target = StagingLayout;

    fn deref(&self) -> &Self::Target {
        &self.layout
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let root = self.layout.root();
        tracing::info!(staging = %root.display(), "clearing staging of failed build");
        if let Err(err) = clear_dir(root) {
            tracing::warn!(
                staging = %root.display(),
                error = %err,
                "failed to clear staging of failed build"
            );
        }
    }
}

/// Removes every entry below `dir`, leaving `dir` itself in place.
pub(crate) fn clear_dir(dir: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&path)?,
            Ok(_) => fs::remove_file(&path)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Best-effort removal of staged paths at service shutdown.
///
/// Paths are removed in reverse registration order; directories are removed
/// recursively. Failures are logged and ignored.
#[derive(Debug)]
pub struct ExitCleanup {
    keep: bool,
    paths: Mutex<Vec<PathBuf>>,
}

impl ExitCleanup {
    pub fn new(keep: bool) -> Self {
        Self {
            keep,
            paths: Mutex::new(Vec::new()),
        }
    }

    /// Registers the staging root, its data directory, socket and pid file.
    pub fn register(&self, layout: &StagingLayout) {
        let mut paths = self.paths.lock();
        paths.push(layout.root().to_path_buf());
        paths.push(layout.data_dir());
        paths.push(layout.socket());
        paths.push(layout.pid_file());
    }

    /// Number of registered paths not yet cleaned up.
    pub fn pending(&self) -> usize {
        self.paths.lock().len()
    }

    /// Removes every registered path, unless staging is kept.
    pub fn run(&self) {
        let paths = std::mem::take(&mut *self.paths.lock());
        if self.keep {
            if let Some(root) = paths.first() {
                tracing::info!(staging = %root.display(), "keeping staging directories");
            }
            return;
        }

        for path in paths.iter().rev() {
            let result = match std::fs::symlink_metadata(path) {
                Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
                Ok(_) => fs::remove_file(path),
                Err(_) => continue,
            };
            if let Err(err) = result {
                tracing::debug!(error = %err, "failed to remove staged path");
            }
        }
    }
}

impl Default for ExitCleanup {
    fn default() -> Self {
        Self::new(*KEEP_STAGING_DIRS)
    }
}

/// Errors raised while preparing a staging directory
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// No staging directory was supplied and a fresh one could not be created
    #[error("failed to create a temporary staging directory")]
    CreateTempDir(#[source] std::io::Error),

    /// The server tools do not cope with whitespace in socket and data paths
    #[error(
        "staging path '{}' contains whitespace; set the 'tempFolder' option (or the \
         'mock.temp_folder' configuration key) to an empty directory without spaces",
        path.display()
    )]
    PathContainsWhitespace { path: PathBuf },

    #[error("staging path '{}' is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("staging directory '{}' is not empty", path.display())]
    NotEmpty { path: PathBuf },

    #[error("failed to read staging directory")]
    ReadDir(#[source] std::io::Error),

    #[error("failed to create staging directory")]
    CreateDir(#[source] std::io::Error),
}
