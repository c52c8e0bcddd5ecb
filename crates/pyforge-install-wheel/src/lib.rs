//! Validate a wheel against the binary-distribution format and install it
//! into a destination root.
//!
//! Validation is fail-fast and happens before anything touches the
//! filesystem: filename grammar, mandatory `.dist-info` members, wheel spec
//! version gate, `RECORD` bijection with digest checks, entry point
//! well-formedness and the shape of the optional `.data` directory.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use install::install_wheel;
pub use wheel::{LibKind, WheelFile};

mod install;
mod script;
mod wheel;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error("Failed to read the wheel file `{}`", _0.display())]
    Zip(PathBuf, #[source] zip::result::ZipError),
    #[error("The wheel is invalid: {0}")]
    InvalidWheel(String),
    #[error("RECORD file doesn't match wheel contents: {0}")]
    RecordFile(String),
    #[error("RECORD file is invalid")]
    Record(#[source] pyforge_archive::Error),
    #[error(transparent)]
    WheelFilename(#[from] pyforge_distribution_filename::WheelFilenameError),
    #[error("Unable to resolve path for wheel: {}", _0.display())]
    WheelPath(PathBuf),
    #[error("Unable to create path for destdir: {}", _0.display())]
    DestDir(PathBuf),
}

/// Absolute destination directories of the target environment, the keys the
/// `.data` directory of a wheel may select.
#[derive(Debug, Clone)]
pub struct Scheme {
    pub purelib: PathBuf,
    pub platlib: PathBuf,
    pub scripts: PathBuf,
    pub data: PathBuf,
    /// The environment's include directory, `{base}/include`.
    pub include: PathBuf,
    /// Explicit headers directory; when absent it is derived from `include`
    /// and the distribution name.
    pub headers: Option<PathBuf>,
}

impl Scheme {
    /// The headers destination for a distribution, `{base}/include/{name}`
    /// unless the environment supplies one.
    pub(crate) fn headers(&self, dist_name: &str) -> PathBuf {
        self.headers
            .clone()
            .unwrap_or_else(|| self.include.join(dist_name))
    }
}

/// The target environment: its interpreter and its installation scheme.
#[derive(Debug, Clone)]
pub struct Layout {
    /// The interpreter launcher scripts point at.
    pub sys_executable: PathBuf,
    pub scheme: Scheme,
}

/// Re-anchor an absolute path under `destdir`, keeping its structure.
pub(crate) fn reroot(destdir: &Path, absolute: &Path) -> PathBuf {
    let mut target = destdir.to_path_buf();
    for component in absolute.components() {
        if let std::path::Component::Normal(segment) = component {
            target.push(segment);
        }
    }
    target
}
