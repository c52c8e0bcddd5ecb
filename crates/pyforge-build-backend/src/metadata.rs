use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Error;
use crate::settings::BackendSettings;

/// The parsed `pyproject.toml` of the source tree.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PyProjectToml {
    pub(crate) project: Project,
    tool: Option<Tool>,
}

#[derive(Debug, Deserialize)]
struct Tool {
    pyforge: Option<BackendSettings>,
}

impl PyProjectToml {
    pub fn parse(contents: &str) -> Result<Self, Error> {
        Ok(toml::from_str(contents)?)
    }

    pub(crate) fn settings(&self) -> BackendSettings {
        self.tool
            .as_ref()
            .and_then(|tool| tool.pyforge.clone())
            .unwrap_or_default()
    }
}

/// The `[project]` table, restricted to the fields this backend knows how to
/// express as core metadata. Unknown fields are rejected.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct Project {
    pub(crate) name: String,
    pub(crate) version: Option<String>,
    description: Option<String>,
    readme: Option<Readme>,
    requires_python: Option<String>,
    license: Option<License>,
    authors: Option<Vec<Contact>>,
    maintainers: Option<Vec<Contact>>,
    keywords: Option<Vec<String>>,
    classifiers: Option<Vec<String>>,
    urls: Option<BTreeMap<String, String>>,
    dynamic: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Readme {
    Path(String),
    Table {
        file: Option<String>,
        text: Option<String>,
        #[serde(rename = "content-type")]
        content_type: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct License {
    file: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Contact {
    name: Option<String>,
    email: Option<String>,
}

/// A rendered core metadata document plus the source files it pulled in,
/// which an sdist must also package.
#[derive(Debug)]
pub(crate) struct CoreMetadata {
    pub(crate) document: String,
    pub(crate) required_files: Vec<PathBuf>,
}

impl Project {
    /// The static project version; dynamic versions are unsupported.
    pub(crate) fn version(&self) -> Result<&str, Error> {
        let dynamic_version = self
            .dynamic
            .as_ref()
            .is_some_and(|dynamic| dynamic.iter().any(|field| field == "version"));
        match &self.version {
            Some(_) if dynamic_version => Err(Error::InvalidMetadata(
                "version cannot be specified as static and dynamic simultaneously".to_string(),
            )),
            Some(version) => Ok(version),
            None => Err(Error::InvalidMetadata(
                "Missing version of project".to_string(),
            )),
        }
    }

    /// Render the Metadata-Version 2.1 core metadata document.
    pub(crate) fn to_core_metadata(&self, root: &Path) -> Result<CoreMetadata, Error> {
        let mut headers = vec![
            ("Metadata-Version".to_string(), "2.1".to_string()),
            ("Name".to_string(), self.name.clone()),
            ("Version".to_string(), self.version()?.to_string()),
        ];
        let mut required_files = Vec::new();

        if let Some(description) = &self.description {
            headers.push(("Summary".to_string(), description.clone()));
        }

        if let Some(authors) = &self.authors {
            let (names, emails) = format_contacts(authors)?;
            if let Some(names) = names {
                headers.push(("Author".to_string(), names));
            }
            if let Some(emails) = emails {
                headers.push(("Author-email".to_string(), emails));
            }
        }
        if let Some(maintainers) = &self.maintainers {
            let (names, emails) = format_contacts(maintainers)?;
            if let Some(names) = names {
                headers.push(("Maintainer".to_string(), names));
            }
            if let Some(emails) = emails {
                headers.push(("Maintainer-email".to_string(), emails));
            }
        }

        if let Some(license) = &self.license {
            let text = match license {
                License {
                    file: Some(file),
                    text: None,
                } => {
                    required_files.push(PathBuf::from(file));
                    fs_err::read_to_string(root.join(file))?
                }
                License {
                    file: None,
                    text: Some(text),
                } => text.clone(),
                _ => {
                    return Err(Error::InvalidMetadata(
                        "keys of license field should be either file or text".to_string(),
                    ));
                }
            };
            headers.push(("License".to_string(), text));
        }

        if let Some(urls) = &self.urls {
            for (label, url) in urls {
                // The label is free text limited to 32 characters
                let label: String = label.chars().take(32).collect();
                headers.push(("Project-URL".to_string(), format!("{label},{url}")));
            }
        }

        if let Some(keywords) = &self.keywords {
            headers.push(("Keywords".to_string(), keywords.join(",")));
        }

        if let Some(classifiers) = &self.classifiers {
            for classifier in classifiers {
                headers.push(("Classifier".to_string(), classifier.clone()));
            }
        }

        if let Some(requires_python) = &self.requires_python {
            headers.push(("Requires-Python".to_string(), requires_python.clone()));
        }

        let payload = match &self.readme {
            Some(Readme::Path(file)) => {
                let content_type = match Path::new(file)
                    .extension()
                    .map(|ext| ext.to_string_lossy().to_lowercase())
                    .as_deref()
                {
                    Some("md") => "text/markdown",
                    Some("rst") => "text/x-rst",
                    _ => "text/plain",
                };
                headers.push((
                    "Description-Content-Type".to_string(),
                    content_type.to_string(),
                ));
                required_files.push(PathBuf::from(file));
                Some(fs_err::read_to_string(root.join(file))?)
            }
            Some(Readme::Table {
                file,
                text,
                content_type,
            }) => {
                headers.push(("Description-Content-Type".to_string(), content_type.clone()));
                match (file, text) {
                    (Some(file), None) => {
                        required_files.push(PathBuf::from(file));
                        Some(fs_err::read_to_string(root.join(file))?)
                    }
                    (None, Some(text)) => Some(text.clone()),
                    _ => {
                        return Err(Error::InvalidMetadata(
                            "keys of readme field should be (file or text) and content-type"
                                .to_string(),
                        ));
                    }
                }
            }
            None => None,
        };

        let mut document = String::new();
        for (name, value) in &headers {
            writeln!(document, "{name}: {value}").unwrap();
        }
        document.push('\n');
        if let Some(payload) = payload {
            document.push_str(&payload);
        }

        Ok(CoreMetadata {
            document,
            required_files,
        })
    }
}

/// Split contacts into a names list and an emails list; a contact with both
/// fields is rendered as `name <email>` on the emails side.
fn format_contacts(contacts: &[Contact]) -> Result<(Option<String>, Option<String>), Error> {
    let mut names = Vec::new();
    let mut emails = Vec::new();
    for contact in contacts {
        match contact {
            Contact {
                name: Some(name),
                email: None,
            } => names.push(name.clone()),
            Contact {
                name: None,
                email: Some(email),
            } => emails.push(email.clone()),
            Contact {
                name: Some(name),
                email: Some(email),
            } => emails.push(format!("{name} <{email}>")),
            Contact {
                name: None,
                email: None,
            } => {
                return Err(Error::InvalidMetadata(
                    "authors entry requires a name or an email".to_string(),
                ));
            }
        }
    }
    let join = |list: Vec<String>| {
        if list.is_empty() {
            None
        } else {
            Some(list.join(","))
        }
    };
    Ok((join(names), join(emails)))
}

/// The `WHEEL` descriptor for the pure-Python wheels this backend produces.
pub(crate) fn wheel_descriptor() -> String {
    format!(
        "Wheel-Version: 1.0\nGenerator: pyforge {}\nRoot-Is-Purelib: true\nTag: py3-none-any\n\n",
        env!("CARGO_PKG_VERSION")
    )
}
