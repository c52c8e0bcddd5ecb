//! Self-hosted build backend.
//!
//! Builds pure-Python wheels and source distributions from a `[project]`
//! table, with backend behavior tuned through `[tool.pyforge]`. Packages
//! `.py` modules only; native code is out of scope.

use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

pub use crate::metadata::PyProjectToml;
pub use crate::settings::BackendSettings;
pub use crate::source_dist::build_sdist;
pub use crate::wheel::build_wheel;

mod metadata;
mod settings;
mod source_dist;
mod wheel;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Invalid pyproject.toml")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid project metadata: {0}")]
    InvalidMetadata(String),
    #[error("Invalid backend settings: {0}")]
    InvalidSettings(String),
    #[error("Invalid license file pattern")]
    Pattern(#[from] glob::PatternError),
    #[error("Failed to match license file pattern")]
    Glob(#[from] glob::GlobError),
    #[error("Failed to walk source tree")]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    Archive(#[from] pyforge_archive::Error),
}

/// Forward-slashed archive member path for a relative filesystem path.
pub(crate) fn archive_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Collect the Python modules under `dir` in deterministic order.
///
/// `__pycache__` directories, `.pyc` caches, symlinks and anything that is
/// not a regular `.py` file are skipped, not errors.
pub(crate) fn python_modules(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut modules = Vec::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != "__pycache__")
    {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        if entry.path().extension().is_none_or(|ext| ext != "py") {
            continue;
        }
        if entry.path_is_symlink() {
            debug!("Ignoring symlink: {}", entry.path().display());
            continue;
        }
        if !entry.file_type().is_file() {
            debug!("Ignoring not a regular file: {}", entry.path().display());
            continue;
        }
        modules.push(entry.into_path());
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{archive_path, python_modules};

    #[test]
    fn slash_paths() {
        assert_eq!(archive_path(Path::new("src/simple/__init__.py")), "src/simple/__init__.py");
        assert_eq!(archive_path(Path::new("./simple.py")), "simple.py");
    }

    #[test]
    fn module_walk_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs_err::create_dir_all(root.join("pkg/__pycache__")).unwrap();
        fs_err::write(root.join("pkg/zz.py"), "").unwrap();
        fs_err::write(root.join("pkg/aa.py"), "").unwrap();
        fs_err::write(root.join("pkg/__pycache__/aa.cpython-312.pyc"), "").unwrap();
        fs_err::write(root.join("pkg/data.json"), "{}").unwrap();
        fs_err::write(root.join("top.py"), "").unwrap();

        let modules = python_modules(root).unwrap();
        let names: Vec<String> = modules
            .iter()
            .map(|path| super::archive_path(path.strip_prefix(root).unwrap()))
            .collect();
        assert_eq!(names, ["pkg/aa.py", "pkg/zz.py", "top.py"]);
    }
}
