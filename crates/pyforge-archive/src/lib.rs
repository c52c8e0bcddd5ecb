//! Archive primitives shared by the build backend and the wheel installer:
//! `RECORD` bookkeeping, content digests, the `SOURCE_DATE_EPOCH` timestamp
//! policy, and deterministic wheel/sdist writers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use normalize::dist_info_name;
pub use record::{
    DIGEST_ALGORITHM, RecordEntry, UNRECORDED_SIGNATURES, WEAK_DIGEST_ALGORITHMS, encode_hash,
    read_record, write_record,
};
pub use sdist::SdistWriter;
pub use timestamp::{ArchiveTimestamps, SOURCE_DATE_EPOCH};
pub use wheel::WheelWriter;

mod normalize;
mod record;
mod sdist;
mod timestamp;
mod wheel;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to write to zip archive `{}`", _0.display())]
    Zip(PathBuf, #[source] zip::result::ZipError),
    #[error("Failed to write to tar archive `{}`", _0.display())]
    TarWrite(PathBuf, #[source] io::Error),
    #[error("Invalid RECORD data")]
    Record(#[from] csv::Error),
    #[error("Invalid SOURCE_DATE_EPOCH value: {0}")]
    SourceDateEpoch(String),
}
