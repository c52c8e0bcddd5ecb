use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use pyforge_distribution_filename::WheelFilename;
use serde_json::json;
use tracing::debug;

use crate::Error;
use crate::hooks::{Hook, call_hook};
use crate::pyproject::BuildSystem;

/// Dropped next to a freshly built wheel so the installer can find it
/// without being told the filename.
pub const WHEEL_TRACKER: &str = ".wheeltracker";

fn ensure_outdir(outdir: &Path) -> Result<PathBuf, Error> {
    fs_err::create_dir_all(outdir).map_err(|err| {
        if err.kind() == io::ErrorKind::PermissionDenied {
            Error::OutputDir(outdir.to_path_buf())
        } else {
            err.into()
        }
    })?;
    Ok(fs_err::canonicalize(outdir)?)
}

/// Run a build hook with `(outdir,)` and the ad-hoc backend config, the
/// calling convention shared by `build_wheel`, `build_sdist` and
/// `prepare_metadata_for_build_wheel`.
fn build(
    python: &Path,
    project_root: &Path,
    outdir: &Path,
    hook: Hook,
    config: Option<&serde_json::Value>,
    verbose: bool,
) -> Result<serde_json::Value, Error> {
    debug!("Source tree: {}", project_root.display());
    debug!("Output dir: {}", outdir.display());
    if let Some(config) = config {
        debug!("Ad-hoc backend config: {config}");
    }

    let outdir = ensure_outdir(outdir)?;
    let build_system = BuildSystem::resolve(project_root)?;
    let hook_args = json!([[outdir], { "config_settings": config }]);
    call_hook(python, project_root, &build_system, hook, &hook_args, verbose)
}

fn expect_filename(hook: Hook, result: serde_json::Value) -> Result<String, Error> {
    match result {
        serde_json::Value::String(filename) => Ok(filename),
        result => Err(Error::UnexpectedHookResult {
            hook,
            result: result.to_string(),
        }),
    }
}

/// Build a wheel into `outdir` and record its filename in the tracker file.
pub fn build_wheel(
    python: &Path,
    project_root: &Path,
    outdir: &Path,
    config: Option<&serde_json::Value>,
    verbose: bool,
) -> Result<String, Error> {
    debug!("Building wheel");
    let result = build(python, project_root, outdir, Hook::BuildWheel, config, verbose)?;
    let filename = expect_filename(Hook::BuildWheel, result)?;
    fs_err::write(outdir.join(WHEEL_TRACKER), format!("{filename}\n"))?;
    debug!("Built wheel: {filename}");
    Ok(filename)
}

/// Build a source distribution into `outdir`.
pub fn build_sdist(
    python: &Path,
    project_root: &Path,
    outdir: &Path,
    config: Option<&serde_json::Value>,
    verbose: bool,
) -> Result<String, Error> {
    debug!("Building sdist");
    let result = build(python, project_root, outdir, Hook::BuildSdist, config, verbose)?;
    let filename = expect_filename(Hook::BuildSdist, result)?;
    debug!("Built sdist: {filename}");
    Ok(filename)
}

/// Build core metadata into `outdir/METADATA` and return that filename.
///
/// Prefers `prepare_metadata_for_build_wheel`; an empty-string result means
/// the backend has no metadata support, in which case a full wheel build in
/// a scratch directory supplies the METADATA member.
pub fn build_metadata(
    python: &Path,
    project_root: &Path,
    outdir: &Path,
    config: Option<&serde_json::Value>,
    verbose: bool,
) -> Result<String, Error> {
    debug!("Building metadata");
    let metadata_filename = "METADATA";
    let outdir = ensure_outdir(outdir)?;

    {
        let tmpdir = tempfile::tempdir()?;
        let result = build(
            python,
            project_root,
            tmpdir.path(),
            Hook::PrepareMetadataForBuildWheel,
            config,
            verbose,
        )?;
        let dist_info_dir = expect_filename(Hook::PrepareMetadataForBuildWheel, result)?;
        if !dist_info_dir.is_empty() {
            fs_err::copy(
                tmpdir.path().join(dist_info_dir).join(metadata_filename),
                outdir.join(metadata_filename),
            )?;
            return Ok(metadata_filename.to_string());
        }
    }

    debug!("Backend has no prepare_metadata_for_build_wheel, falling back to build_wheel");
    let tmpdir = tempfile::tempdir()?;
    let result = build(
        python,
        project_root,
        tmpdir.path(),
        Hook::BuildWheel,
        config,
        verbose,
    )?;
    let wheel_filename = expect_filename(Hook::BuildWheel, result)?;
    let parsed = WheelFilename::from_str(&wheel_filename)?;

    let wheel = fs_err::File::open(tmpdir.path().join(&wheel_filename))?;
    let mut archive = zip::ZipArchive::new(wheel.into_parts().0)?;
    let mut member = archive.by_name(&format!("{}/{metadata_filename}", parsed.dist_info_dir()))?;
    let mut target = fs_err::File::create(outdir.join(metadata_filename))?;
    io::copy(&mut member, &mut target)?;
    Ok(metadata_filename.to_string())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use indoc::indoc;

    use super::{WHEEL_TRACKER, build_sdist, build_wheel};
    use crate::Error;

    fn fake_python(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("python");
        fs_err::write(&path, script).unwrap();
        let mut permissions = fs_err::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o755);
        fs_err::set_permissions(&path, permissions).unwrap();
        path
    }

    #[test]
    fn wheel_tracker_written() {
        let dir = tempfile::tempdir().unwrap();
        let srcdir = dir.path().join("src");
        fs_err::create_dir(&srcdir).unwrap();
        let outdir = dir.path().join("dist");
        let python = fake_python(
            dir.path(),
            indoc! {r#"
                #!/bin/sh
                printf '{"result": "simple-1.0-py3-none-any.whl"}' >&3
            "#},
        );

        let filename = build_wheel(&python, &srcdir, &outdir, None, false).unwrap();
        assert_eq!(filename, "simple-1.0-py3-none-any.whl");
        assert_eq!(
            fs_err::read_to_string(outdir.join(WHEEL_TRACKER)).unwrap(),
            "simple-1.0-py3-none-any.whl\n"
        );
    }

    #[test]
    fn sdist_leaves_no_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let srcdir = dir.path().join("src");
        fs_err::create_dir(&srcdir).unwrap();
        let outdir = dir.path().join("dist");
        let python = fake_python(
            dir.path(),
            indoc! {r#"
                #!/bin/sh
                printf '{"result": "simple-1.0.tar.gz"}' >&3
            "#},
        );

        let filename = build_sdist(&python, &srcdir, &outdir, None, false).unwrap();
        assert_eq!(filename, "simple-1.0.tar.gz");
        assert!(!outdir.join(WHEEL_TRACKER).exists());
    }

    #[test]
    fn non_string_result_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let srcdir = dir.path().join("src");
        fs_err::create_dir(&srcdir).unwrap();
        let python = fake_python(
            dir.path(),
            indoc! {r#"
                #!/bin/sh
                printf '{"result": 42}' >&3
            "#},
        );

        let err = build_wheel(&python, &srcdir, &dir.path().join("dist"), None, false)
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedHookResult { .. }));
    }
}
