use std::path::{Path, PathBuf};

use pyforge_archive::{ArchiveTimestamps, SdistWriter, dist_info_name};
use tracing::debug;

use crate::metadata::PyProjectToml;
use crate::{Error, archive_path, python_modules};

/// Build a source distribution from `source_tree` into `sdist_directory` and
/// return its filename.
///
/// The archive carries the Python modules of the package dir (plus any
/// `include-dirs-sdist` entries), `pyproject.toml`, a `PKG-INFO` document
/// and the files the core metadata references.
pub fn build_sdist(source_tree: &Path, sdist_directory: &Path) -> Result<String, Error> {
    let pyproject = PyProjectToml::parse(&fs_err::read_to_string(
        source_tree.join("pyproject.toml"),
    )?)?;
    let settings = pyproject.settings().resolve(source_tree)?;
    let metadata = pyproject.project.to_core_metadata(source_tree)?;

    let name = dist_info_name(&pyproject.project.name);
    let version = pyproject.project.version()?;
    // accept only normalized versions
    if version.contains('-') {
        return Err(Error::InvalidMetadata(format!(
            "Normalized version numbers cannot contain -, given: {version}"
        )));
    }

    fs_err::create_dir_all(sdist_directory)?;
    let sdist_directory = fs_err::canonicalize(sdist_directory)?;
    debug!("Building sdist in {}", source_tree.display());
    debug!("Sdist directory: {}", sdist_directory.display());

    let filename = format!("{name}-{version}.tar.gz");
    let timestamps = ArchiveTimestamps::from_env()?;
    let mut writer = SdistWriter::new(
        sdist_directory.join(&filename),
        format!("{name}-{version}"),
    )?;

    // Unlike in a wheel, members keep their path relative to the tree root.
    let mut search_dirs = vec![settings.package_dir.clone()];
    search_dirs.extend(settings.include_dirs_sdist.iter().cloned());
    for dir in &search_dirs {
        for module in python_modules(&source_tree.join(dir))? {
            let target = archive_path(
                module
                    .strip_prefix(source_tree)
                    .expect("walked path is under the source tree"),
            );
            debug!("Sdisting {target}");
            let mtime = timestamps.for_path(&fs_err::metadata(&module)?);
            writer.write_file(&target, &module, mtime)?;
        }
    }

    writer.write_bytes("PKG-INFO", metadata.document.as_bytes(), timestamps.now())?;

    let mut required_files = vec![PathBuf::from("pyproject.toml")];
    required_files.extend(metadata.required_files);
    for file in required_files {
        if file.is_absolute() {
            return Err(Error::InvalidMetadata(format!(
                "Path should be relative, given: {}",
                file.display()
            )));
        }
        let path = source_tree.join(&file);
        if path.is_symlink() {
            return Err(Error::InvalidMetadata(format!(
                "Symlinks are not supported: {}",
                file.display()
            )));
        }
        if !path.is_file() {
            return Err(Error::InvalidMetadata(format!(
                "Only regular files are supported: {}",
                file.display()
            )));
        }
        let mtime = timestamps.for_path(&fs_err::metadata(&path)?);
        writer.write_file(&archive_path(&file), &path, mtime)?;
    }

    writer.close()?;
    Ok(filename)
}
