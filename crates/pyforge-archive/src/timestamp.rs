use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::Error;

/// The environment variable that pins archive member timestamps for
/// reproducible builds. See <https://reproducible-builds.org/docs/source-date-epoch/>.
pub const SOURCE_DATE_EPOCH: &str = "SOURCE_DATE_EPOCH";

/// The DOS epoch, the earliest timestamp a zip archive can represent.
const ZIP_EPOCH: u64 = 315_532_800;

/// Timestamp policy for archive members, resolved once per build.
///
/// When `SOURCE_DATE_EPOCH` is set, every member carries that timestamp;
/// otherwise members keep their filesystem modification times.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveTimestamps {
    epoch: Option<u64>,
}

impl ArchiveTimestamps {
    pub fn from_env() -> Result<Self, Error> {
        let epoch = match std::env::var(SOURCE_DATE_EPOCH) {
            Ok(value) => Some(
                value
                    .parse::<u64>()
                    .map_err(|_| Error::SourceDateEpoch(value))?,
            ),
            Err(_) => None,
        };
        if let Some(epoch) = epoch {
            debug!("Pinning archive timestamps to {epoch}");
        }
        Ok(Self { epoch })
    }

    /// The timestamp to record for a file, honoring the pinned epoch.
    pub fn for_path(&self, metadata: &std::fs::Metadata) -> u64 {
        if let Some(epoch) = self.epoch {
            return epoch;
        }
        metadata
            .modified()
            .ok()
            .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |duration| duration.as_secs())
    }

    /// The timestamp to record for generated members with no backing file.
    pub fn now(&self) -> u64 {
        if let Some(epoch) = self.epoch {
            return epoch;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_secs())
    }
}

/// Convert Unix seconds into a zip (DOS) timestamp, clamped into the
/// representable 1980..=2107 range.
pub(crate) fn zip_datetime(timestamp: u64) -> zip::DateTime {
    let timestamp = timestamp.clamp(ZIP_EPOCH, 4_354_819_198);
    let days = timestamp / 86_400;
    let secs_of_day = timestamp % 86_400;

    // Civil-from-days (Howard Hinnant's algorithm), days since 1970-01-01.
    let z = days as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };

    zip::DateTime::from_date_and_time(
        year as u16,
        month as u8,
        day as u8,
        (secs_of_day / 3600) as u8,
        (secs_of_day % 3600 / 60) as u8,
        (secs_of_day % 60) as u8,
    )
    .unwrap_or_default()
}
