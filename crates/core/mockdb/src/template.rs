//! Baseline data-directory template.
//!
//! Every ephemeral instance starts from the same pristine server data
//! directory, shipped as a gzip'd tar archive and unpacked verbatim into the
//! staging `data/` directory before the first server launch.
//!
//! A template without system tablespaces (such as the bundled skeleton) is
//! not a usable data directory; [`is_initialized`] tells the builder to run
//! the server's own initialization instead.

use std::{
    io::Read,
    path::{Path, PathBuf},
};

use fs_err as fs;

/// Archive compiled into the library.
static EMBEDDED_TEMPLATE: &[u8] = include_bytes!("../assets/datadir-template.tar.gz");

/// Where the data-directory template comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TemplateSource {
    /// The archive bundled with the library
    #[default]
    Embedded,
    /// A `.tar.gz` archive on disk
    File(PathBuf),
}

impl TemplateSource {
    /// Unpacks the template into `data_dir`, which must already exist.
    pub fn unpack_into(&self, data_dir: &Path) -> Result<(), TemplateError> {
        match self {
            Self::Embedded => unpack(EMBEDDED_TEMPLATE, data_dir),
            Self::File(path) => {
                let file = fs::File::open(path).map_err(TemplateError::ReadArchive)?;
                unpack(file, data_dir)
            }
        }?;

        tracing::debug!(
            data_dir = %data_dir.display(),
            source = ?self,
            "unpacked data directory template"
        );

        Ok(())
    }
}

/// Files only an initialized data directory carries, for 8.0+ and 5.x layouts.
const INITIALIZED_MARKERS: [&str; 3] = ["mysql.ibd", "ibdata1", "mysql/user.frm"];

/// Whether `data_dir` holds an initialized server data directory.
pub fn is_initialized(data_dir: &Path) -> bool {
    INITIALIZED_MARKERS
        .iter()
        .any(|marker| data_dir.join(marker).is_file())
}

fn unpack<R: Read>(reader: R, data_dir: &Path) -> Result<(), TemplateError> {
    let gz = flate2::read::GzDecoder::new(reader);
    let mut archive = tar::Archive::new(gz);
    archive.unpack(data_dir).map_err(TemplateError::Unpack)
}

/// Errors raised while unpacking the data-directory template
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to open data directory template archive")]
    ReadArchive(#[source] std::io::Error),

    #[error("failed to unpack data directory template")]
    Unpack(#[source] std::io::Error),
}
