//! Discovery of the external MySQL tools inside a `binLocation` directory.
//!
//! | Tool            | Role                                              |
//! |-----------------|---------------------------------------------------|
//! | `mysqldump`     | Export the reference schema (structure only)      |
//! | `mysql`         | Replay the schema into the ephemeral instance     |
//! | `mysqld`        | Run the ephemeral server                          |
//! | `mysql_upgrade` | Finalize the unpacked template data directory     |
//!
//! A tool is found when `<name>`, `<name>.exe` or `<name>.sh` exists in the
//! directory.

use std::path::{Path, PathBuf};

/// Filename suffixes accepted for each tool, in lookup order.
const TOOL_SUFFIXES: [&str; 3] = ["", ".exe", ".sh"];

/// The four external executables the builder drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Schema snapshot tool
    Dump,
    /// Interactive client, used to load the snapshot
    Client,
    /// Server daemon
    Server,
    /// Bootstrap/upgrade tool
    Upgrade,
}

impl Tool {
    /// Tools in validation order.
    pub const ALL: [Tool; 4] = [Tool::Dump, Tool::Client, Tool::Server, Tool::Upgrade];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Dump => "mysqldump",
            Self::Client => "mysql",
            Self::Server => "mysqld",
            Self::Upgrade => "mysql_upgrade",
        }
    }

    /// Extra guidance appended to a missing-tool error.
    fn hint(&self) -> &'static str {
        if *self == Self::Server && cfg!(unix) {
            "\n(on Linux distributions the server usually lives in /usr/sbin; try \
             `sudo ln -s /usr/sbin/mysqld /usr/bin/mysqld`)"
        } else {
            ""
        }
    }

    /// Finds this tool inside `bin_location`.
    fn locate(&self, bin_location: &Path) -> Option<PathBuf> {
        TOOL_SUFFIXES
            .iter()
            .map(|suffix| bin_location.join(format!("{}{suffix}", self.name())))
            .find(|candidate| candidate.exists())
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved paths of all four tools from one validated `binLocation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolset {
    bin_location: PathBuf,
    dump: PathBuf,
    client: PathBuf,
    server: PathBuf,
    upgrade: PathBuf,
}

impl Toolset {
    /// Validates that `bin_location` contains every required tool.
    ///
    /// Surrounding double quotes are stripped from the path first, since
    /// Windows-style configuration values often carry them.
    pub fn discover(bin_location: &Path) -> Result<Self, ToolError> {
        let raw = bin_location.to_string_lossy();
        let unquoted = raw.trim_start_matches('"').trim_end_matches('"');
        let dir = PathBuf::from(unquoted);

        let find = |tool: Tool| {
            tool.locate(&dir).ok_or_else(|| ToolError::MissingTool {
                tool,
                bin_location: bin_location.to_path_buf(),
                hint: tool.hint(),
            })
        };

        let toolset = Self {
            dump: find(Tool::Dump)?,
            client: find(Tool::Client)?,
            server: find(Tool::Server)?,
            upgrade: find(Tool::Upgrade)?,
            bin_location: dir,
        };

        tracing::debug!(
            bin_location = %toolset.bin_location.display(),
            "validated external tool directory"
        );

        Ok(toolset)
    }

    pub fn bin_location(&self) -> &Path {
        &self.bin_location
    }

    /// Path of the given tool.
    pub fn path(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Dump => &self.dump,
            Tool::Client => &self.client,
            Tool::Server => &self.server,
            Tool::Upgrade => &self.upgrade,
        }
    }
}

/// Errors raised while locating the external tools
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Neither the request nor any earlier request supplied `binLocation`
    #[error("missing mandatory configuration parameter 'binLocation'")]
    MissingBinLocation,

    /// A required tool is absent from `binLocation`
    #[error("missing {tool} in {}{hint}", bin_location.display())]
    MissingTool {
        tool: Tool,
        bin_location: PathBuf,
        hint: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use fs_err as fs;

    use super::*;

    fn bin_dir_with(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        for name in names {
            fs::write(dir.path().join(name), "").expect("tool stub should be written");
        }
        dir
    }

    #[test]
    fn discover_with_all_tools_resolves_each_path() {
        //* Given
        let dir = bin_dir_with(&["mysqldump", "mysql", "mysqld", "mysql_upgrade"]);

        //* When
        let toolset = Toolset::discover(dir.path()).expect("all tools are present");

        //* Then
        assert_eq!(toolset.path(Tool::Dump), dir.path().join("mysqldump"));
        assert_eq!(toolset.path(Tool::Upgrade), dir.path().join("mysql_upgrade"));
    }

    #[test]
    fn discover_accepts_platform_suffixes() {
        //* Given
        let dir = bin_dir_with(&["mysqldump.exe", "mysql.sh", "mysqld", "mysql_upgrade.exe"]);

        //* When
        let toolset = Toolset::discover(dir.path()).expect("suffixed tools should be accepted");

        //* Then
        assert_eq!(toolset.path(Tool::Dump), dir.path().join("mysqldump.exe"));
        assert_eq!(toolset.path(Tool::Client), dir.path().join("mysql.sh"));
    }

    #[test]
    fn discover_names_the_single_missing_tool() {
        for missing in Tool::ALL {
            //* Given
            let present: Vec<&str> = Tool::ALL
                .iter()
                .filter(|tool| **tool != missing)
                .map(Tool::name)
                .collect();
            let dir = bin_dir_with(&present);

            //* When
            let result = Toolset::discover(dir.path());

            //* Then
            let err = result.expect_err("a missing tool should fail discovery");
            assert!(
                matches!(err, ToolError::MissingTool { tool, .. } if tool == missing),
                "expected MissingTool({missing}), got {err:?}"
            );
            assert!(
                err.to_string().starts_with(&format!("missing {} in ", missing.name())),
                "error should name {missing}: {err}"
            );
        }
    }

    #[test]
    fn discover_strips_surrounding_quotes() {
        //* Given
        let dir = bin_dir_with(&["mysqldump", "mysql", "mysqld", "mysql_upgrade"]);
        let quoted = PathBuf::from(format!("\"{}\"", dir.path().display()));

        //* When
        let toolset = Toolset::discover(&quoted).expect("quoted path should be accepted");

        //* Then
        assert_eq!(toolset.bin_location(), dir.path());
    }
}
