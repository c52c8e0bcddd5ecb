use std::io::{Read, Write};

use data_encoding::BASE64URL_NOPAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Error;

/// The digest algorithm used when writing `RECORD` entries.
pub const DIGEST_ALGORITHM: &str = "sha256";

/// Digest algorithms that must not appear in a `RECORD`.
pub const WEAK_DIGEST_ALGORITHMS: &[&str] = &["md5", "sha1"];

/// Detached signature files that may be packaged without a `RECORD` row.
pub const UNRECORDED_SIGNATURES: &[&str] = &["RECORD.jws", "RECORD.p7s"];

/// Line in a `RECORD` file, e.g.
/// `pyforge/__init__.py,sha256=qwPrTLtWer9VwuQW1rhW9Kjyd4BUPW-3oj2cvylzbwo,42`.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct RecordEntry {
    pub path: String,
    pub hash: Option<String>,
    pub size: Option<u64>,
}

impl RecordEntry {
    /// A row for file contents hashed during packaging.
    pub fn hashed(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            hash: Some(encode_hash(&Sha256::digest(bytes))),
            size: Some(bytes.len() as u64),
        }
    }

    /// The `RECORD` file itself is listed without hash or size.
    pub fn unhashed(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: None,
            size: None,
        }
    }
}

/// Format a raw digest the way `RECORD` expects it: the algorithm name, an
/// equals sign, then the urlsafe-base64 digest without padding.
pub fn encode_hash(digest: &[u8]) -> String {
    format!("{DIGEST_ALGORITHM}={}", BASE64URL_NOPAD.encode(digest))
}

/// Parse a `RECORD` file into entries.
pub fn read_record(reader: impl Read) -> Result<Vec<RecordEntry>, Error> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .escape(Some(b'"'))
        .from_reader(reader)
        .deserialize()
        .map(|entry| Ok(entry?))
        .collect()
}

/// Serialize entries back into the `RECORD` CSV format.
pub fn write_record(writer: impl Write, entries: &[RecordEntry]) -> Result<(), Error> {
    let mut record_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    for entry in entries {
        record_writer.serialize(entry)?;
    }
    record_writer.flush()?;
    Ok(())
}
