use std::path::Path;

use pyforge_archive::{ArchiveTimestamps, WheelWriter, dist_info_name};
use tracing::debug;

use crate::metadata::{PyProjectToml, wheel_descriptor};
use crate::{Error, archive_path, python_modules};

/// Build a pure-Python wheel from `source_tree` into `wheel_directory` and
/// return its filename.
pub fn build_wheel(source_tree: &Path, wheel_directory: &Path) -> Result<String, Error> {
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

    fs_err::create_dir_all(wheel_directory)?;
    let wheel_directory = fs_err::canonicalize(wheel_directory)?;
    debug!("Building wheel in {}", source_tree.display());
    debug!("Wheel directory: {}", wheel_directory.display());

    let filename = format!("{name}-{version}-py3-none-any.whl");
    let dist_info_dir = format!("{name}-{version}.dist-info");
    let timestamps = ArchiveTimestamps::from_env()?;
    let mut writer = WheelWriter::new(wheel_directory.join(&filename))?;

    // Modules land at the wheel root, stripped of the package dir prefix.
    let package_dir = source_tree.join(&settings.package_dir);
    for module in python_modules(&package_dir)? {
        let target = archive_path(
            module
                .strip_prefix(&package_dir)
                .expect("walked path is under the package dir"),
        );
        debug!("Wheeling {target}");
        let mtime = timestamps.for_path(&fs_err::metadata(&module)?);
        writer.write_file(&target, &module, mtime)?;
    }

    writer.write_bytes(
        &format!("{dist_info_dir}/WHEEL"),
        wheel_descriptor().as_bytes(),
        timestamps.now(),
    )?;
    writer.write_bytes(
        &format!("{dist_info_dir}/METADATA"),
        metadata.document.as_bytes(),
        timestamps.now(),
    )?;

    // License files are looked up in the source tree root only.
    for pattern in &settings.license_files {
        for file in glob::glob(&source_tree.join(pattern).to_string_lossy())? {
            let file = file?;
            if !file.is_file() || file.is_symlink() {
                continue;
            }
            let file_name = file
                .file_name()
                .expect("glob matches carry a file name")
                .to_string_lossy()
                .into_owned();
            debug!("Packaging license: {file_name}");
            let mtime = timestamps.for_path(&fs_err::metadata(&file)?);
            writer.write_file(&format!("{dist_info_dir}/{file_name}"), &file, mtime)?;
        }
    }

    writer.close(&dist_info_dir, timestamps.now())?;
    Ok(filename)
}
