use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

/// The parsed components of a source distribution filename, e.g.
/// `foo-1.0.tar.gz`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SourceDistFilename {
    pub name: String,
    pub version: String,
}

impl FromStr for SourceDistFilename {
    type Err = SourceDistFilenameError;

    fn from_str(filename: &str) -> Result<Self, Self::Err> {
        let stem = filename.strip_suffix(".tar.gz").ok_or_else(|| {
            SourceDistFilenameError::InvalidSourceDistFileName(
                filename.to_string(),
                "Must end with .tar.gz".to_string(),
            )
        })?;
        let Some((name, version)) = stem.rsplit_once('-') else {
            return Err(SourceDistFilenameError::InvalidSourceDistFileName(
                filename.to_string(),
                "Must be separated by a dash".to_string(),
            ));
        };
        if name.is_empty() || version.is_empty() {
            return Err(SourceDistFilenameError::InvalidSourceDistFileName(
                filename.to_string(),
                "Must have a name and a version".to_string(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
        })
    }
}

impl Display for SourceDistFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}.tar.gz", self.name, self.version)
    }
}

#[derive(Error, Debug)]
pub enum SourceDistFilenameError {
    #[error("The source distribution filename \"{0}\" is invalid: {1}")]
    InvalidSourceDistFileName(String, String),
}
