use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use fs_err::File;
use tar::Header;
use tracing::trace;

use crate::Error;

/// Writes a `.tar.gz` source distribution with every member under the
/// `{name}-{version}/` top-level directory.
///
/// Members carry POSIX ustar headers with mode `0o644` and the
/// caller-provided timestamps, so a pinned `SOURCE_DATE_EPOCH` yields
/// byte-identical archives.
pub struct SdistWriter {
    path: PathBuf,
    prefix: String,
    tar: tar::Builder<GzEncoder<std::fs::File>>,
}

impl SdistWriter {
    pub fn new(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        let file = File::create(&path)?;
        let encoder = GzEncoder::new(file.into_parts().0, Compression::default());
        Ok(Self {
            path,
            prefix: prefix.into(),
            tar: tar::Builder::new(encoder),
        })
    }

    fn header(size: u64, timestamp: u64) -> Header {
        let mut header = Header::new_ustar();
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(timestamp);
        header
    }

    /// Add a generated member from memory.
    pub fn write_bytes(&mut self, target: &str, bytes: &[u8], timestamp: u64) -> Result<(), Error> {
        let target = format!("{}/{target}", self.prefix);
        trace!("Adding {target}");
        let mut header = Self::header(bytes.len() as u64, timestamp);
        self.tar
            .append_data(&mut header, target, Cursor::new(bytes))
            .map_err(|err| Error::TarWrite(self.path.clone(), err))?;
        Ok(())
    }

    /// Add a file from disk.
    pub fn write_file(&mut self, target: &str, file: &Path, timestamp: u64) -> Result<(), Error> {
        let target = format!("{}/{target}", self.prefix);
        trace!("Adding {target} from {}", file.display());
        let metadata = fs_err::metadata(file)?;
        let mut header = Self::header(metadata.len(), timestamp);
        let reader = BufReader::new(File::open(file)?);
        self.tar
            .append_data(&mut header, target, reader)
            .map_err(|err| Error::TarWrite(self.path.clone(), err))?;
        Ok(())
    }

    pub fn close(mut self) -> Result<PathBuf, Error> {
        self.tar
            .finish()
            .map_err(|err| Error::TarWrite(self.path.clone(), err))?;
        Ok(self.path)
    }
}
