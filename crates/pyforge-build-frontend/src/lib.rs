//! PEP 517 build front-end.
//!
//! Resolves the build system declared in `pyproject.toml`, spawns the
//! designated interpreter with a small bootstrap program, and retrieves hook
//! results over a dedicated pipe.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use build::{WHEEL_TRACKER, build_metadata, build_sdist, build_wheel};
pub use hooks::{Hook, call_hook};
pub use pyproject::{BuildSystem, DEFAULT_BACKEND, DEFAULT_REQUIRES};

mod build;
mod hooks;
mod pyproject;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Invalid pyproject.toml")]
    InvalidPyprojectToml(#[from] toml::de::Error),
    #[error("{0}")]
    InvalidBuildSystem(String),
    #[error("Unable to create path for outdir: {}", _0.display())]
    OutputDir(PathBuf),
    #[error("Failed to run {}", _0.display())]
    CommandFailed(PathBuf, #[source] io::Error),
    #[error("{message}:\n--- stdout:\n{stdout}\n--- stderr:\n{stderr}\n---")]
    HookFailed {
        message: String,
        stdout: String,
        stderr: String,
    },
    #[error("Failed to read hook result channel")]
    ResultChannel(#[source] io::Error),
    #[error("Hook result channel reader thread panicked")]
    ResultChannelPanic,
    #[error("Invalid hook result, expected JSON object {{\"result\": ...}}, received: {raw:?}")]
    InvalidHookResult {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Hook {hook} returned an unexpected result: {result}")]
    UnexpectedHookResult { hook: Hook, result: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Failed to read wheel")]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    WheelFilename(#[from] pyforge_distribution_filename::WheelFilenameError),
}
