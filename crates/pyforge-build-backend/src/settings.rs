use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Error;

/// Default glob patterns for license files packaged into the `.dist-info`
/// directory, matched against the source tree root only.
const DEFAULT_LICENSE_FILES: &[&str] = &["LICENSE*", "COPYING*"];

/// `[tool.pyforge]`: backend behavior not expressible in `[project]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackendSettings {
    /// The directory whose Python modules become the wheel contents.
    /// Relative to the source tree root, defaults to the root itself.
    package_dir: Option<String>,
    /// Extra directories to search for modules when building an sdist,
    /// e.g. a `tests` directory.
    include_dirs_sdist: Option<Vec<String>>,
    /// Overrides the default `LICENSE*`/`COPYING*` patterns.
    license_files: Option<Vec<String>>,
}

/// Settings with every path validated against the source tree.
#[derive(Debug)]
pub(crate) struct ResolvedSettings {
    pub(crate) package_dir: PathBuf,
    pub(crate) include_dirs_sdist: Vec<PathBuf>,
    pub(crate) license_files: Vec<String>,
}

impl BackendSettings {
    /// Validate every configured path: it must be relative and resolve to a
    /// location inside `root`.
    pub(crate) fn resolve(self, root: &Path) -> Result<ResolvedSettings, Error> {
        let package_dir = validate_path(
            root,
            Path::new(self.package_dir.as_deref().unwrap_or(".")),
        )?;
        let include_dirs_sdist = self
            .include_dirs_sdist
            .unwrap_or_default()
            .iter()
            .map(|dir| validate_path(root, Path::new(dir)))
            .collect::<Result<_, _>>()?;
        let license_files = self.license_files.unwrap_or_else(|| {
            DEFAULT_LICENSE_FILES
                .iter()
                .map(ToString::to_string)
                .collect()
        });
        Ok(ResolvedSettings {
            package_dir,
            include_dirs_sdist,
            license_files,
        })
    }
}

/// Returns the path unchanged (still relative) after checking it resolves
/// inside the source tree.
fn validate_path(root: &Path, path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        return Err(Error::InvalidSettings(format!(
            "{} should be relative",
            path.display()
        )));
    }
    let root = fs_err::canonicalize(root)?;
    let resolved = fs_err::canonicalize(root.join(path)).map_err(|_| {
        Error::InvalidSettings(format!("Unable to resolve {}", path.display()))
    })?;
    if !resolved.starts_with(&root) {
        return Err(Error::InvalidSettings(format!(
            "{} should be relative",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}
