use std::path::Path;

use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::script::{Script, format_shebang, get_script_launcher, scripts_from_ini};
use crate::wheel::{LibKind, WheelFile};
use crate::{Error, Layout, reroot};

/// `.dist-info` members kept when metadata stripping is requested.
const STRIPPED_DIST_INFO_ALLOW: &[&str] = &["METADATA", "entry_points.txt"];

/// `.dist-info` members never installed.
const DIST_INFO_DENY: &[&str] = &["RECORD"];

/// Data scripts left by a build backend start with this placeholder shebang
/// and get pointed at the target interpreter during installation.
const PYTHON_SHEBANG: &[u8] = b"#!python";

/// Validate a wheel and install it under `destdir` according to `layout`.
///
/// The scheme paths of the layout are absolute paths of the target
/// environment; they are re-anchored under `destdir`, so installing with
/// `destdir` set to `/` writes into the environment itself.
#[instrument(skip_all, fields(wheel = %wheel_path.display()))]
pub fn install_wheel(
    layout: &Layout,
    wheel_path: &Path,
    destdir: &Path,
    installer: Option<&str>,
    strip_dist_info: bool,
) -> Result<(), Error> {
    let wheel_path = fs_err::canonicalize(wheel_path)
        .map_err(|_| Error::WheelPath(wheel_path.to_path_buf()))?;
    fs_err::create_dir_all(destdir).map_err(|_| Error::DestDir(destdir.to_path_buf()))?;
    let destdir =
        fs_err::canonicalize(destdir).map_err(|_| Error::DestDir(destdir.to_path_buf()))?;

    let mut wheel = WheelFile::open(&wheel_path)?;
    let dist_info_dir = wheel.filename.dist_info_dir();

    let sitedir = match wheel.lib_kind {
        LibKind::Pure => &layout.scheme.purelib,
        LibKind::Plat => &layout.scheme.platlib,
    };
    let rootdir = reroot(&destdir, sitedir);
    debug!("Installing to {}", rootdir.display());
    fs_err::create_dir_all(&rootdir)?;

    let members = filter_members(&dist_info_dir, wheel.member_names(), strip_dist_info);
    wheel.extract(&members, &rootdir)?;

    let shebang = format_shebang(&layout.sys_executable);

    let entry_points = rootdir.join(&dist_info_dir).join("entry_points.txt");
    if entry_points.is_file() {
        let ini = fs_err::read_to_string(&entry_points)?;
        let (console_scripts, gui_scripts) = scripts_from_ini(&ini)?;
        if !console_scripts.is_empty() || !gui_scripts.is_empty() {
            let scripts_dir = reroot(&destdir, &layout.scheme.scripts);
            fs_err::create_dir_all(&scripts_dir)?;
            for script in console_scripts.iter().chain(&gui_scripts) {
                write_launcher(&scripts_dir, script, &shebang)?;
            }
        }
    }

    if let Some(installer) = installer {
        fs_err::write(
            rootdir.join(&dist_info_dir).join("INSTALLER"),
            format!("{installer}\n"),
        )?;
    }

    install_data(layout, &destdir, &rootdir, &wheel, &shebang)?;
    Ok(())
}

/// Select the members to extract: `RECORD` never lands on disk, and with
/// `strip_dist_info` only the metadata needed at runtime survives.
fn filter_members(
    dist_info_dir: &str,
    member_names: &[String],
    strip_dist_info: bool,
) -> Vec<String> {
    let prefix = format!("{dist_info_dir}/");
    member_names
        .iter()
        .filter(|member| {
            let Some(rest) = member.strip_prefix(&prefix) else {
                return true;
            };
            if DIST_INFO_DENY.contains(&rest) {
                return false;
            }
            if strip_dist_info {
                return STRIPPED_DIST_INFO_ALLOW.contains(&rest);
            }
            true
        })
        .cloned()
        .collect()
}

fn write_launcher(scripts_dir: &Path, script: &Script, shebang: &str) -> Result<(), Error> {
    let target = scripts_dir.join(&script.name);
    debug!("Installing launcher {}", target.display());
    fs_err::write(&target, get_script_launcher(script, shebang))?;
    make_executable(&target)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs_err::metadata(path)?.permissions().mode();
    fs_err::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o555))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), Error> {
    Ok(())
}

/// Move the contents of the extracted `.data` directory to their scheme
/// destinations, then drop the directory itself.
fn install_data(
    layout: &Layout,
    destdir: &Path,
    rootdir: &Path,
    wheel: &WheelFile,
    shebang: &str,
) -> Result<(), Error> {
    let data_dir = rootdir.join(wheel.filename.data_dir());
    if !data_dir.is_dir() {
        return Ok(());
    }
    for entry in fs_err::read_dir(&data_dir)? {
        let entry = entry?;
        let key = entry.file_name().to_string_lossy().into_owned();
        let target_base = match key.as_str() {
            "purelib" => layout.scheme.purelib.clone(),
            "platlib" => layout.scheme.platlib.clone(),
            "scripts" => layout.scheme.scripts.clone(),
            "data" => layout.scheme.data.clone(),
            "headers" => layout.scheme.headers(&wheel.filename.name),
            // validation only lets the scheme keys through
            _ => {
                return Err(Error::InvalidWheel(format!(
                    "unsupported scheme key in {}: {key}",
                    wheel.filename.data_dir()
                )));
            }
        };
        let target = reroot(destdir, &target_base);
        debug!("Installing data [{key}] to {}", target.display());
        if key == "scripts" {
            install_data_scripts(&entry.path(), &target, shebang)?;
        } else {
            copy_tree(&entry.path(), &target)?;
        }
    }
    fs_err::remove_dir_all(&data_dir)?;
    Ok(())
}

fn copy_tree(source: &Path, target: &Path) -> Result<(), Error> {
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("walked path is under the source");
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs_err::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                fs_err::create_dir_all(parent)?;
            }
            fs_err::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

/// Install the files of a `.data/scripts` directory, replacing the
/// `#!python` placeholder line with the target interpreter's shebang and
/// marking the scripts executable.
fn install_data_scripts(source: &Path, target: &Path, shebang: &str) -> Result<(), Error> {
    fs_err::create_dir_all(target)?;
    for entry in fs_err::read_dir(source)? {
        let entry = entry?;
        let destination = target.join(entry.file_name());
        if !entry.file_type()?.is_file() {
            copy_tree(&entry.path(), &destination)?;
            continue;
        }
        let contents = fs_err::read(entry.path())?;
        let (first_line, payload) = match contents.iter().position(|&byte| byte == b'\n') {
            Some(index) => contents.split_at(index + 1),
            None => (contents.as_slice(), [].as_slice()),
        };
        if first_line.starts_with(PYTHON_SHEBANG) {
            let mut rewritten = Vec::with_capacity(shebang.len() + 1 + payload.len());
            rewritten.extend_from_slice(shebang.as_bytes());
            rewritten.push(b'\n');
            rewritten.extend_from_slice(payload);
            fs_err::write(&destination, rewritten)?;
        } else {
            fs_err::copy(entry.path(), &destination)?;
        }
        make_executable(&destination)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use pyforge_archive::WheelWriter;

    use super::{filter_members, install_wheel};
    use crate::{Layout, Scheme};

    const WHEEL_TEXT: &str =
        "Wheel-Version: 1.0\nGenerator: pyforge 1.0\nRoot-Is-Purelib: true\nTag: py3-none-any\n\n";
    const METADATA_TEXT: &str = "Metadata-Version: 2.1\nName: simple\nVersion: 1.0\n";

    fn layout() -> Layout {
        Layout {
            sys_executable: PathBuf::from("/usr/bin/python3"),
            scheme: Scheme {
                purelib: PathBuf::from("/usr/lib/python3/site-packages"),
                platlib: PathBuf::from("/usr/lib64/python3/site-packages"),
                scripts: PathBuf::from("/usr/bin"),
                data: PathBuf::from("/usr"),
                include: PathBuf::from("/usr/include/python3"),
                headers: None,
            },
        }
    }

    fn build_wheel(dir: &Path, extra: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join("simple-1.0-py3-none-any.whl");
        let mut writer = WheelWriter::new(&path).unwrap();
        writer
            .write_bytes("simple/__init__.py", b"__version__ = \"1.0\"\n", 0)
            .unwrap();
        for (name, contents) in extra {
            writer.write_bytes(name, contents, 0).unwrap();
        }
        writer
            .write_bytes("simple-1.0.dist-info/WHEEL", WHEEL_TEXT.as_bytes(), 0)
            .unwrap();
        writer
            .write_bytes("simple-1.0.dist-info/METADATA", METADATA_TEXT.as_bytes(), 0)
            .unwrap();
        writer.close("simple-1.0.dist-info", 0).unwrap();
        path
    }

    fn sitedir(destdir: &Path) -> PathBuf {
        destdir.join("usr/lib/python3/site-packages")
    }

    #[test]
    fn minimal_install() {
        let dir = tempfile::tempdir().unwrap();
        let wheel = build_wheel(dir.path(), &[]);
        let destdir = dir.path().join("destdir");

        install_wheel(&layout(), &wheel, &destdir, None, false).unwrap();

        let sitedir = sitedir(&destdir);
        assert!(sitedir.join("simple/__init__.py").is_file());
        assert!(sitedir.join("simple-1.0.dist-info/METADATA").is_file());
        assert!(sitedir.join("simple-1.0.dist-info/WHEEL").is_file());
        // RECORD stays in the wheel, INSTALLER was not requested
        assert!(!sitedir.join("simple-1.0.dist-info/RECORD").exists());
        assert!(!sitedir.join("simple-1.0.dist-info/INSTALLER").exists());
    }

    #[test]
    fn installer_file() {
        let dir = tempfile::tempdir().unwrap();
        let wheel = build_wheel(dir.path(), &[]);
        let destdir = dir.path().join("destdir");

        install_wheel(&layout(), &wheel, &destdir, Some("pyforge"), false).unwrap();

        let installer =
            fs_err::read_to_string(sitedir(&destdir).join("simple-1.0.dist-info/INSTALLER"))
                .unwrap();
        assert_eq!(installer, "pyforge\n");
    }

    #[test]
    fn strip_dist_info() {
        let dir = tempfile::tempdir().unwrap();
        let wheel = build_wheel(
            dir.path(),
            &[("simple-1.0.dist-info/LICENSE", b"MIT\n".as_slice())],
        );
        let destdir = dir.path().join("destdir");

        install_wheel(&layout(), &wheel, &destdir, None, true).unwrap();

        let dist_info = sitedir(&destdir).join("simple-1.0.dist-info");
        assert!(dist_info.join("METADATA").is_file());
        assert!(!dist_info.join("WHEEL").exists());
        assert!(!dist_info.join("LICENSE").exists());
    }

    #[test]
    fn console_script_launcher() {
        let dir = tempfile::tempdir().unwrap();
        let wheel = build_wheel(
            dir.path(),
            &[(
                "simple-1.0.dist-info/entry_points.txt",
                b"[console_scripts]\nhello = simple:main\n".as_slice(),
            )],
        );
        let destdir = dir.path().join("destdir");

        install_wheel(&layout(), &wheel, &destdir, None, false).unwrap();

        let launcher = destdir.join("usr/bin/hello");
        insta::assert_snapshot!(
            fs_err::read_to_string(&launcher).unwrap(),
            @r#"
        #!/usr/bin/python3

        import sys

        from simple import main


        if __name__ == "__main__":
            sys.exit(main())
        "#
        );
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs_err::metadata(&launcher).unwrap().permissions().mode();
            assert_eq!(mode & 0o555, 0o555);
        }
    }

    #[test]
    fn data_directory() {
        let dir = tempfile::tempdir().unwrap();
        let wheel = build_wheel(
            dir.path(),
            &[
                (
                    "simple-1.0.data/scripts/tool",
                    b"#!python\nprint(\"tool\")\n".as_slice(),
                ),
                (
                    "simple-1.0.data/data/share/doc/simple.txt",
                    b"docs\n".as_slice(),
                ),
            ],
        );
        let destdir = dir.path().join("destdir");

        install_wheel(&layout(), &wheel, &destdir, None, false).unwrap();

        let tool = fs_err::read_to_string(destdir.join("usr/bin/tool")).unwrap();
        assert_eq!(tool, "#!/usr/bin/python3\nprint(\"tool\")\n");
        assert_eq!(
            fs_err::read_to_string(destdir.join("usr/share/doc/simple.txt")).unwrap(),
            "docs\n"
        );
        // the staging directory is gone after the move
        assert!(!sitedir(&destdir).join("simple-1.0.data").exists());
    }

    #[test]
    fn member_filtering() {
        let members = vec![
            "simple/__init__.py".to_string(),
            "simple-1.0.dist-info/METADATA".to_string(),
            "simple-1.0.dist-info/WHEEL".to_string(),
            "simple-1.0.dist-info/entry_points.txt".to_string(),
            "simple-1.0.dist-info/RECORD".to_string(),
        ];
        assert_eq!(
            filter_members("simple-1.0.dist-info", &members, false),
            [
                "simple/__init__.py",
                "simple-1.0.dist-info/METADATA",
                "simple-1.0.dist-info/WHEEL",
                "simple-1.0.dist-info/entry_points.txt",
            ]
        );
        assert_eq!(
            filter_members("simple-1.0.dist-info", &members, true),
            [
                "simple/__init__.py",
                "simple-1.0.dist-info/METADATA",
                "simple-1.0.dist-info/entry_points.txt",
            ]
        );
    }
}
