use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

/// The parsed components of a wheel filename, e.g. `foo-1.0-py3-none-any.whl`.
///
/// The filename carries either five or six dash-separated segments; the
/// optional third segment is the build tag.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct WheelFilename {
    pub name: String,
    pub version: String,
    pub build_tag: Option<String>,
    pub python_tag: String,
    pub abi_tag: String,
    pub platform_tag: String,
}

impl FromStr for WheelFilename {
    type Err = WheelFilenameError;

    fn from_str(filename: &str) -> Result<Self, Self::Err> {
        let stem = filename.strip_suffix(".whl").ok_or_else(|| {
            WheelFilenameError::InvalidWheelFileName(
                filename.to_string(),
                "Must end with .whl".to_string(),
            )
        })?;
        Self::parse(stem, filename)
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.whl", self.stem())
    }
}

impl WheelFilename {
    /// The wheel filename without the extension.
    pub fn stem(&self) -> String {
        if let Some(build_tag) = &self.build_tag {
            format!(
                "{}-{}-{}-{}-{}-{}",
                self.name, self.version, build_tag, self.python_tag, self.abi_tag, self.platform_tag
            )
        } else {
            format!(
                "{}-{}-{}-{}-{}",
                self.name, self.version, self.python_tag, self.abi_tag, self.platform_tag
            )
        }
    }

    /// The name of the `.dist-info` directory packaged in this wheel.
    pub fn dist_info_dir(&self) -> String {
        format!("{}-{}.dist-info", self.name, self.version)
    }

    /// The name of the `.data` directory packaged in this wheel.
    pub fn data_dir(&self) -> String {
        format!("{}-{}.data", self.name, self.version)
    }

    /// Parse a wheel filename from the stem (e.g., `foo-1.2.3-py3-none-any`).
    ///
    /// The originating `filename` is used for high-fidelity error messages.
    fn parse(stem: &str, filename: &str) -> Result<Self, WheelFilenameError> {
        // https://packaging.python.org/en/latest/specifications/binary-distribution-format/#file-name-convention
        let segments: Vec<&str> = stem.split('-').collect();
        let (name, version, build_tag, python_tag, abi_tag, platform_tag) = match segments[..] {
            [name, version, python_tag, abi_tag, platform_tag] => {
                (name, version, None, python_tag, abi_tag, platform_tag)
            }
            [name, version, build_tag, python_tag, abi_tag, platform_tag] => (
                name,
                version,
                Some(build_tag),
                python_tag,
                abi_tag,
                platform_tag,
            ),
            _ => {
                return Err(WheelFilenameError::InvalidWheelFileName(
                    filename.to_string(),
                    format!("Must have 5 or 6 components, but has {}", segments.len()),
                ));
            }
        };

        for (segment, label) in [
            (name, "a name"),
            (version, "a version"),
            (python_tag, "a Python tag"),
            (abi_tag, "an ABI tag"),
            (platform_tag, "a platform tag"),
        ] {
            if segment.is_empty() {
                return Err(WheelFilenameError::InvalidWheelFileName(
                    filename.to_string(),
                    format!("Must have {label}"),
                ));
            }
        }

        if build_tag.is_some_and(str::is_empty) {
            return Err(WheelFilenameError::InvalidWheelFileName(
                filename.to_string(),
                "Build tag must be non-empty if present".to_string(),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            build_tag: build_tag.map(ToString::to_string),
            python_tag: python_tag.to_string(),
            abi_tag: abi_tag.to_string(),
            platform_tag: platform_tag.to_string(),
        })
    }
}

#[derive(Error, Debug)]
pub enum WheelFilenameError {
    #[error("The wheel filename \"{0}\" is invalid: {1}")]
    InvalidWheelFileName(String, String),
}
