use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use data_encoding::BASE64URL_NOPAD;
use fs_err::File;
use mailparse::MailHeaderMap;
use pyforge_archive::{RecordEntry, UNRECORDED_SIGNATURES, WEAK_DIGEST_ALGORITHMS, read_record};
use pyforge_distribution_filename::WheelFilename;
use rustc_hash::{FxHashMap, FxHashSet};
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::Error;
use crate::script::scripts_from_ini;

/// The highest wheel spec version this installer understands.
const SUPPORTED_WHEEL_VERSION: (u64, u64) = (1, 0);

/// The scheme keys an optional `.data` directory may carry.
const DATA_SCHEME_KEYS: &[&str] = &["purelib", "platlib", "headers", "scripts", "data"];

/// Whether the wheel installs into the purelib or the platlib directory.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LibKind {
    Pure,
    Plat,
}

/// A wheel archive checked against the binary-distribution format.
///
/// `open` runs the whole validation pipeline, so an instance is known good:
/// the mandatory `.dist-info` members exist, the wheel spec version is
/// supported, `RECORD` and the packaged members form a bijection with
/// matching digests, the entry points parse, and the optional `.data`
/// directory only selects known scheme keys.
pub struct WheelFile {
    pub filename: WheelFilename,
    pub lib_kind: LibKind,
    path: PathBuf,
    archive: ZipArchive<std::fs::File>,
    member_names: Vec<String>,
}

impl fmt::Debug for WheelFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WheelFile")
            .field("filename", &self.filename)
            .field("lib_kind", &self.lib_kind)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl WheelFile {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::WheelPath(path.to_path_buf()))?;
        let filename: WheelFilename = file_name.parse()?;

        let archive = ZipArchive::new(File::open(path)?.into_parts().0)
            .map_err(|err| Error::Zip(path.to_path_buf(), err))?;
        let member_names: Vec<String> = archive.file_names().map(ToString::to_string).collect();

        let mut wheel = Self {
            filename,
            lib_kind: LibKind::Pure,
            path: path.to_path_buf(),
            archive,
            member_names,
        };
        wheel.validate()?;
        Ok(wheel)
    }

    pub fn member_names(&self) -> &[String] {
        &self.member_names
    }

    fn validate(&mut self) -> Result<(), Error> {
        debug!("Validating {}", self.path.display());
        let dist_info_dir = self.filename.dist_info_dir();

        for mandatory in ["METADATA", "WHEEL", "RECORD"] {
            let member = format!("{dist_info_dir}/{mandatory}");
            if !self.member_names.iter().any(|name| *name == member) {
                return Err(Error::InvalidWheel(format!(
                    "missing mandatory file: {member}"
                )));
            }
        }

        let wheel_text = self.read_member(&format!("{dist_info_dir}/WHEEL"))?;
        self.lib_kind = parse_wheel_file(&wheel_text)?;

        self.validate_record(&dist_info_dir)?;

        let entry_points = format!("{dist_info_dir}/entry_points.txt");
        if self.member_names.iter().any(|name| *name == entry_points) {
            let ini = self.read_member(&entry_points)?;
            let ini = String::from_utf8(ini).map_err(|_| {
                Error::InvalidWheel("entry_points.txt is not valid UTF-8".to_string())
            })?;
            scripts_from_ini(&ini)?;
        }

        self.validate_data()?;
        Ok(())
    }

    /// `RECORD` and the packaged members must describe each other exactly,
    /// with detached signature files as the only members allowed to go
    /// unrecorded.
    fn validate_record(&mut self, dist_info_dir: &str) -> Result<(), Error> {
        let record_path = format!("{dist_info_dir}/RECORD");
        let record = read_record(self.read_member(&record_path)?.as_slice())
            .map_err(Error::Record)?;
        if record.is_empty() {
            return Err(Error::RecordFile("Empty RECORD file".to_string()));
        }

        let mut recorded: FxHashMap<String, RecordEntry> = FxHashMap::default();
        for entry in record {
            let path = entry.path.clone();
            if recorded.insert(path.clone(), entry).is_some() {
                return Err(Error::RecordFile(format!("Multiple records for: {path}")));
            }
        }

        // Directory entries carry no contents and are not recorded.
        let packaged: FxHashSet<&str> = self
            .member_names
            .iter()
            .filter(|name| !name.ends_with('/'))
            .map(String::as_str)
            .collect();

        let exempt: Vec<String> = UNRECORDED_SIGNATURES
            .iter()
            .map(|signature| format!("{dist_info_dir}/{signature}"))
            .collect();
        for member in &packaged {
            if recorded.contains_key(*member) || exempt.iter().any(|path| path == member) {
                continue;
            }
            return Err(Error::RecordFile(format!(
                "Packaged file is not recorded: {member}"
            )));
        }
        for path in recorded.keys() {
            if !packaged.contains(path.as_str()) {
                return Err(Error::RecordFile(format!(
                    "Recorded file is not packaged: {path}"
                )));
            }
        }

        for (path, entry) in &recorded {
            if *path == record_path {
                continue;
            }
            let Some(hash) = &entry.hash else {
                return Err(Error::RecordFile(format!("Missing hash for: {path}")));
            };
            let (algorithm, expected) = hash.split_once('=').ok_or_else(|| {
                Error::RecordFile(format!("Invalid hash format for {path}: {hash}"))
            })?;
            let algorithm = algorithm.to_ascii_lowercase();
            if WEAK_DIGEST_ALGORITHMS.contains(&algorithm.as_str()) {
                return Err(Error::RecordFile(format!(
                    "Too weak hash algorithm for hashsum: {algorithm}"
                )));
            }
            let contents = self.read_member(path)?;
            let actual = match algorithm.as_str() {
                "sha256" => BASE64URL_NOPAD.encode(&Sha256::digest(&contents)),
                "sha384" => BASE64URL_NOPAD.encode(&Sha384::digest(&contents)),
                "sha512" => BASE64URL_NOPAD.encode(&Sha512::digest(&contents)),
                _ => {
                    return Err(Error::RecordFile(format!(
                        "Unsupported hash algorithm: {algorithm}"
                    )));
                }
            };
            if actual != expected {
                return Err(Error::RecordFile(format!(
                    "Incorrect hash for recorded file: {path}"
                )));
            }
            if let Some(size) = entry.size {
                if size != contents.len() as u64 {
                    return Err(Error::RecordFile(format!(
                        "Incorrect size for recorded file: {path}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The optional `.data` directory may only contain subdirectories named
    /// after installation scheme keys, never files at its top level.
    fn validate_data(&self) -> Result<(), Error> {
        let data_dir = self.filename.data_dir();
        let prefix = format!("{data_dir}/");
        let mut keys = BTreeSet::new();
        for name in &self.member_names {
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                Some((key, _)) => {
                    keys.insert(key);
                }
                None => {
                    return Err(Error::InvalidWheel(format!(
                        "{data_dir} cannot contain files, given: {rest}"
                    )));
                }
            }
        }
        for key in keys {
            if !DATA_SCHEME_KEYS.contains(&key) {
                return Err(Error::InvalidWheel(format!(
                    "unsupported scheme key in {data_dir}: {key}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn read_member(&mut self, name: &str) -> Result<Vec<u8>, Error> {
        let mut member = self
            .archive
            .by_name(name)
            .map_err(|err| Error::Zip(self.path.clone(), err))?;
        let mut contents = Vec::new();
        member.read_to_end(&mut contents)?;
        Ok(contents)
    }

    /// Extract `members` under `target`, keeping the recorded unix modes.
    pub(crate) fn extract(&mut self, members: &[String], target: &Path) -> Result<(), Error> {
        for name in members {
            let mut member = self
                .archive
                .by_name(name)
                .map_err(|err| Error::Zip(self.path.clone(), err))?;
            let relative = member
                .enclosed_name()
                .ok_or_else(|| Error::InvalidWheel(format!("unsafe member path: {name}")))?;
            let destination = target.join(relative);
            if name.ends_with('/') {
                fs_err::create_dir_all(&destination)?;
                continue;
            }
            if let Some(parent) = destination.parent() {
                fs_err::create_dir_all(parent)?;
            }
            let mut out = File::create(&destination)?;
            io::copy(&mut member, &mut out)?;
            #[cfg(unix)]
            if let Some(mode) = member.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                fs_err::set_permissions(&destination, std::fs::Permissions::from_mode(mode))?;
            }
        }
        Ok(())
    }
}

/// Check the `WHEEL` descriptor: gate on the spec version and read
/// `Root-Is-Purelib`.
fn parse_wheel_file(contents: &[u8]) -> Result<LibKind, Error> {
    let message = mailparse::parse_mail(contents)
        .map_err(|err| Error::InvalidWheel(format!("WHEEL is not parseable: {err}")))?;
    let headers = message.get_headers();

    let version = headers
        .get_first_value("Wheel-Version")
        .ok_or_else(|| Error::InvalidWheel("missing Wheel-Version in WHEEL".to_string()))?;
    let version = version.trim().to_string();
    // The version is a dotted integer tuple of any length, e.g. 1.0 or 1.0.1.
    let parts: Option<Vec<u64>> = version
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect();
    let Some(parts) = parts else {
        return Err(Error::InvalidWheel(format!(
            "invalid Wheel-Version in WHEEL: {version}"
        )));
    };
    if parts[0] > SUPPORTED_WHEEL_VERSION.0 {
        return Err(Error::InvalidWheel(format!(
            "Incompatible version of Wheel spec: {version}, supported: {}.{}",
            SUPPORTED_WHEEL_VERSION.0, SUPPORTED_WHEEL_VERSION.1
        )));
    }
    if parts > vec![SUPPORTED_WHEEL_VERSION.0, SUPPORTED_WHEEL_VERSION.1] {
        warn!(
            "Wheel spec version {version} is newer than the supported {}.{}, proceeding",
            SUPPORTED_WHEEL_VERSION.0, SUPPORTED_WHEEL_VERSION.1
        );
    }

    let purelib = headers
        .get_first_value("Root-Is-Purelib")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));
    Ok(if purelib { LibKind::Pure } else { LibKind::Plat })
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::{Path, PathBuf};

    use pyforge_archive::{RecordEntry, WheelWriter, write_record};
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    use super::{LibKind, WheelFile, parse_wheel_file};

    const WHEEL_TEXT: &str =
        "Wheel-Version: 1.0\nGenerator: pyforge 1.0\nRoot-Is-Purelib: true\nTag: py3-none-any\n\n";
    const METADATA_TEXT: &str = "Metadata-Version: 2.1\nName: simple\nVersion: 1.0\n";

    /// A well-formed wheel with correct `RECORD` rows, plus extra members.
    fn good_wheel(dir: &Path, extra: &[(&str, &[u8])]) -> PathBuf {
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

    /// A wheel authored member by member, `RECORD` contents included, for
    /// tampering scenarios.
    fn raw_wheel(dir: &Path, members: &[(&str, &[u8])], record: &[RecordEntry]) -> PathBuf {
        let path = dir.join("simple-1.0-py3-none-any.whl");
        let mut zip = ZipWriter::new(std::fs::File::create(&path).unwrap());
        for (name, contents) in members {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(contents).unwrap();
        }
        let mut buffer = Vec::new();
        write_record(&mut buffer, record).unwrap();
        zip.start_file("simple-1.0.dist-info/RECORD", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(&buffer).unwrap();
        zip.finish().unwrap();
        path
    }

    fn base_members() -> Vec<(&'static str, &'static [u8])> {
        vec![
            ("simple-1.0.dist-info/WHEEL", WHEEL_TEXT.as_bytes()),
            ("simple-1.0.dist-info/METADATA", METADATA_TEXT.as_bytes()),
        ]
    }

    fn base_record() -> Vec<RecordEntry> {
        vec![
            RecordEntry::hashed("simple-1.0.dist-info/WHEEL", WHEEL_TEXT.as_bytes()),
            RecordEntry::hashed("simple-1.0.dist-info/METADATA", METADATA_TEXT.as_bytes()),
            RecordEntry::unhashed("simple-1.0.dist-info/RECORD"),
        ]
    }

    #[test]
    fn valid_wheel() {
        let dir = tempfile::tempdir().unwrap();
        let wheel = WheelFile::open(&good_wheel(dir.path(), &[])).unwrap();
        assert_eq!(wheel.lib_kind, LibKind::Pure);
        assert_eq!(wheel.filename.name, "simple");
    }

    #[test]
    fn missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simple-1.0-py3-none-any.whl");
        let mut zip = ZipWriter::new(std::fs::File::create(&path).unwrap());
        zip.start_file("simple-1.0.dist-info/WHEEL", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(WHEEL_TEXT.as_bytes()).unwrap();
        zip.start_file("simple-1.0.dist-info/METADATA", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(METADATA_TEXT.as_bytes()).unwrap();
        zip.finish().unwrap();

        let err = WheelFile::open(&path).unwrap_err();
        insta::assert_snapshot!(
            err,
            @"The wheel is invalid: missing mandatory file: simple-1.0.dist-info/RECORD"
        );
    }

    #[test]
    fn tampered_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut members = base_members();
        let mut record = base_record();
        // The recorded hash belongs to different file contents.
        members.push(("simple/__init__.py", b"tampered\n".as_slice()));
        record.push(RecordEntry::hashed(
            "simple/__init__.py",
            b"__version__ = \"1.0\"\n",
        ));
        let err = WheelFile::open(&raw_wheel(dir.path(), &members, &record)).unwrap_err();
        insta::assert_snapshot!(
            err,
            @"RECORD file doesn't match wheel contents: Incorrect hash for recorded file: simple/__init__.py"
        );
    }

    #[test]
    fn unrecorded_member() {
        let dir = tempfile::tempdir().unwrap();
        let mut members = base_members();
        members.push(("simple/extra.py", b"".as_slice()));
        let err = WheelFile::open(&raw_wheel(dir.path(), &members, &base_record())).unwrap_err();
        insta::assert_snapshot!(
            err,
            @"RECORD file doesn't match wheel contents: Packaged file is not recorded: simple/extra.py"
        );
    }

    #[test]
    fn detached_signatures_may_go_unrecorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut members = base_members();
        members.push(("simple-1.0.dist-info/RECORD.jws", b"{}".as_slice()));
        assert!(WheelFile::open(&raw_wheel(dir.path(), &members, &base_record())).is_ok());
    }

    #[test]
    fn recorded_but_not_packaged() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = base_record();
        record.push(RecordEntry::hashed("simple/missing.py", b""));
        let err = WheelFile::open(&raw_wheel(dir.path(), &base_members(), &record)).unwrap_err();
        insta::assert_snapshot!(
            err,
            @"RECORD file doesn't match wheel contents: Recorded file is not packaged: simple/missing.py"
        );
    }

    #[test]
    fn weak_hash_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let mut members = base_members();
        let mut record = base_record();
        members.push(("simple/__init__.py", b"".as_slice()));
        record.push(RecordEntry {
            path: "simple/__init__.py".to_string(),
            hash: Some("md5=1B2M2Y8AsgTpgAmY7PhCfg".to_string()),
            size: Some(0),
        });
        let err = WheelFile::open(&raw_wheel(dir.path(), &members, &record)).unwrap_err();
        insta::assert_snapshot!(
            err,
            @"RECORD file doesn't match wheel contents: Too weak hash algorithm for hashsum: md5"
        );
    }

    #[test]
    fn duplicate_record_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = base_record();
        record.push(RecordEntry::hashed(
            "simple-1.0.dist-info/WHEEL",
            WHEEL_TEXT.as_bytes(),
        ));
        let err = WheelFile::open(&raw_wheel(dir.path(), &base_members(), &record)).unwrap_err();
        assert!(err.to_string().contains("Multiple records for"));
    }

    #[test]
    fn incompatible_wheel_version() {
        let err = parse_wheel_file(b"Wheel-Version: 2.0\nRoot-Is-Purelib: true\n\n").unwrap_err();
        insta::assert_snapshot!(
            err,
            @"The wheel is invalid: Incompatible version of Wheel spec: 2.0, supported: 1.0"
        );
    }

    #[test]
    fn newer_minor_version_is_accepted() {
        let kind = parse_wheel_file(b"Wheel-Version: 1.9\nRoot-Is-Purelib: false\n\n").unwrap();
        assert_eq!(kind, LibKind::Plat);
    }

    #[test]
    fn patch_release_version_is_accepted() {
        let kind = parse_wheel_file(b"Wheel-Version: 1.0.1\nRoot-Is-Purelib: true\n\n").unwrap();
        assert_eq!(kind, LibKind::Pure);
    }

    #[test]
    fn bare_major_version_is_accepted() {
        assert!(parse_wheel_file(b"Wheel-Version: 1\nRoot-Is-Purelib: true\n\n").is_ok());
    }

    #[test]
    fn non_numeric_version_is_rejected() {
        let err = parse_wheel_file(b"Wheel-Version: one.zero\nRoot-Is-Purelib: true\n\n")
            .unwrap_err();
        assert!(err.to_string().contains("invalid Wheel-Version"));
    }

    #[test]
    fn hash_algorithm_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let mut members = base_members();
        let mut record = base_record();
        members.push(("simple/__init__.py", b"".as_slice()));
        let mut entry = RecordEntry::hashed("simple/__init__.py", b"");
        entry.hash = entry.hash.map(|hash| hash.replacen("sha256", "SHA256", 1));
        record.push(entry);
        assert!(WheelFile::open(&raw_wheel(dir.path(), &members, &record)).is_ok());
    }

    #[test]
    fn data_dir_with_top_level_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = WheelFile::open(&good_wheel(
            dir.path(),
            &[("simple-1.0.data/stray.txt", b"stray\n".as_slice())],
        ))
        .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"The wheel is invalid: simple-1.0.data cannot contain files, given: stray.txt"
        );
    }

    #[test]
    fn data_dir_with_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let err = WheelFile::open(&good_wheel(
            dir.path(),
            &[("simple-1.0.data/bindir/tool", b"".as_slice())],
        ))
        .unwrap_err();
        insta::assert_snapshot!(
            err,
            @"The wheel is invalid: unsupported scheme key in simple-1.0.data: bindir"
        );
    }

    #[test]
    fn invalid_entry_points_member() {
        let dir = tempfile::tempdir().unwrap();
        let err = WheelFile::open(&good_wheel(
            dir.path(),
            &[(
                "simple-1.0.dist-info/entry_points.txt",
                b"[console_scripts]\nhello = not an entry point\n".as_slice(),
            )],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("invalid entry point for hello"));
    }
}
