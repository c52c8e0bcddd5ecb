use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs_err::File;
use sha2::{Digest, Sha256};
use tracing::trace;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::record::{RecordEntry, encode_hash, write_record};
use crate::timestamp::zip_datetime;
use crate::Error;

/// Writes a wheel while tracking the `RECORD` rows for every member.
///
/// Members are stored deflated with mode `0o644`; `close` appends the
/// `RECORD` file, which must be the last member of the `.dist-info`
/// directory.
pub struct WheelWriter {
    path: PathBuf,
    zip: ZipWriter<std::fs::File>,
    record: Vec<RecordEntry>,
}

impl WheelWriter {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            zip: ZipWriter::new(file.into_parts().0),
            record: Vec::new(),
        })
    }

    fn options(timestamp: u64) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644)
            .last_modified_time(zip_datetime(timestamp))
    }

    /// Add a generated member from memory.
    pub fn write_bytes(&mut self, target: &str, bytes: &[u8], timestamp: u64) -> Result<(), Error> {
        trace!("Adding {target}");
        self.zip
            .start_file(target, Self::options(timestamp))
            .map_err(|err| Error::Zip(self.path.clone(), err))?;
        self.zip.write_all(bytes)?;
        self.record.push(RecordEntry::hashed(target, bytes));
        Ok(())
    }

    /// Add a file from disk, hashing its contents while streaming them into
    /// the archive.
    pub fn write_file(&mut self, target: &str, file: &Path, timestamp: u64) -> Result<(), Error> {
        trace!("Adding {target} from {}", file.display());
        self.zip
            .start_file(target, Self::options(timestamp))
            .map_err(|err| Error::Zip(self.path.clone(), err))?;

        let mut reader = File::open(file)?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            self.zip.write_all(&buffer[..read])?;
            size += read as u64;
        }

        self.record.push(RecordEntry {
            path: target.to_string(),
            hash: Some(encode_hash(&hasher.finalize())),
            size: Some(size),
        });
        Ok(())
    }

    /// Write the `RECORD` member and finish the archive.
    pub fn close(mut self, dist_info_dir: &str, timestamp: u64) -> Result<PathBuf, Error> {
        let record_path = format!("{dist_info_dir}/RECORD");
        self.record.push(RecordEntry::unhashed(&record_path));

        let mut buffer = Vec::new();
        write_record(&mut buffer, &self.record)?;

        self.zip
            .start_file(&record_path, Self::options(timestamp))
            .map_err(|err| Error::Zip(self.path.clone(), err))?;
        self.zip.write_all(&buffer)?;
        self.zip
            .finish()
            .map_err(|err| Error::Zip(self.path.clone(), err))?;
        Ok(self.path)
    }
}
