use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Error;

/// The backend used when `pyproject.toml` or its `[build-system]` table is
/// missing, per PEP 517's source-tree fallback.
pub const DEFAULT_BACKEND: &str = "setuptools.build_meta:__legacy__";

/// The requirements implied by the fallback backend.
pub const DEFAULT_REQUIRES: &[&str] = &["setuptools>=40.8.0", "wheel"];

/// The resolved `[build-system]` table of a source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSystem {
    /// `build-system.requires`, kept verbatim; this front-end does not
    /// install them.
    pub requires: Vec<String>,
    /// The backend reference, e.g. `setuptools.build_meta:__legacy__`.
    pub build_backend: String,
    /// `build-system.backend-path` entries, validated but kept relative.
    pub backend_path: Option<Vec<PathBuf>>,
}

impl BuildSystem {
    fn legacy() -> Self {
        Self {
            requires: DEFAULT_REQUIRES.iter().map(ToString::to_string).collect(),
            build_backend: DEFAULT_BACKEND.to_string(),
            backend_path: None,
        }
    }

    /// Resolve the build system of `project_root`.
    ///
    /// A missing `pyproject.toml` or a missing `[build-system]` table selects
    /// the legacy setuptools backend. A present table must carry `requires`;
    /// a missing `build-backend` again selects the legacy backend.
    pub fn resolve(project_root: &Path) -> Result<Self, Error> {
        let pyproject_path = project_root.join("pyproject.toml");
        let contents = match fs_err::read_to_string(&pyproject_path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No pyproject.toml, using the default build system");
                return Ok(Self::legacy());
            }
            Err(err) => return Err(err.into()),
        };
        let pyproject: toml::Table = toml::from_str(&contents)?;

        let Some(build_system) = pyproject.get("build-system") else {
            debug!("No [build-system] table, using the default build system");
            return Ok(Self::legacy());
        };
        let build_system = build_system.as_table().ok_or_else(|| {
            Error::InvalidBuildSystem("build-system should be a table".to_string())
        })?;

        let requires = build_system.get("requires").ok_or_else(|| {
            Error::InvalidBuildSystem("Missing mandatory build-system.requires".to_string())
        })?;
        let requires = string_list(requires)
            .ok_or_else(|| Error::InvalidBuildSystem("requires should be a list of strings".to_string()))?;

        let build_backend = match build_system.get("build-backend") {
            Some(value) => value
                .as_str()
                .ok_or_else(|| {
                    Error::InvalidBuildSystem("build-backend should be a string".to_string())
                })?
                .to_string(),
            None => {
                debug!("No build-backend, using the default build backend");
                return Ok(Self {
                    requires,
                    ..Self::legacy()
                });
            }
        };

        let backend_path = match build_system.get("backend-path") {
            Some(value) => {
                let entries = string_list(value).ok_or_else(|| {
                    Error::InvalidBuildSystem("backend-path should be a list of strings".to_string())
                })?;
                Some(validate_backend_path(project_root, entries)?)
            }
            None => None,
        };

        Ok(Self {
            requires,
            build_backend,
            backend_path,
        })
    }
}

fn string_list(value: &toml::Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|entry| entry.as_str().map(ToString::to_string))
        .collect()
}

/// Entries must be relative and resolve to existing locations inside the
/// source tree. The validated entries stay relative; hooks run with the
/// source tree as working directory.
fn validate_backend_path(
    project_root: &Path,
    entries: Vec<String>,
) -> Result<Vec<PathBuf>, Error> {
    let absolute: Vec<&String> = entries
        .iter()
        .filter(|entry| Path::new(entry).is_absolute())
        .collect();
    if !absolute.is_empty() {
        return Err(Error::InvalidBuildSystem(format!(
            "Invalid absolute backend-path: {}, paths should be relative to source tree",
            absolute
                .iter()
                .map(|entry| entry.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let root = fs_err::canonicalize(project_root)?;
    let mut validated = Vec::with_capacity(entries.len());
    for entry in entries {
        let resolved = fs_err::canonicalize(root.join(&entry)).map_err(|_| {
            Error::InvalidBuildSystem(format!("Unable to resolve backend-path: {entry}"))
        })?;
        if !resolved.starts_with(&root) {
            return Err(Error::InvalidBuildSystem(format!(
                "Invalid backend-path, path should refer to location within source tree, \
                 given {entry} is resolved to {}",
                resolved.display()
            )));
        }
        validated.push(PathBuf::from(entry));
    }
    Ok(validated)
}
