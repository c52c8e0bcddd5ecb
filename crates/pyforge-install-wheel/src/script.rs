use std::path::Path;
use std::sync::LazyLock;

use configparser::ini::Ini;
use regex::Regex;

use crate::Error;

/// <https://packaging.python.org/en/latest/specifications/entry-points/>
static SCRIPT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<module>[\w\d_\-.]+)\s*:\s*(?P<function>[\w\d_\-.]+)(?:\s*\[\s*(?P<extras>(?:[^,]+,?\s*)+)\])?\s*$").unwrap()
});

/// A script defined in `entry_points.txt`, e.g. `hello = simple.cli:main`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct Script {
    pub(crate) name: String,
    pub(crate) module: String,
    pub(crate) function: String,
}

impl Script {
    pub(crate) fn from_value(name: &str, value: &str) -> Result<Self, Error> {
        let captures = SCRIPT_REGEX.captures(value).ok_or_else(|| {
            Error::InvalidWheel(format!("invalid entry point for {name}: {value}"))
        })?;
        Ok(Self {
            name: name.to_string(),
            module: captures["module"].to_string(),
            function: captures["function"].to_string(),
        })
    }

    /// The name bound by the launcher's import statement. For a nested
    /// attribute path such as `cli.main` that is the part before the first
    /// dot.
    fn import_name(&self) -> &str {
        self.function
            .split_once('.')
            .map_or(self.function.as_str(), |(import_name, _)| import_name)
    }
}

/// Parse the `console_scripts` and `gui_scripts` sections of an
/// `entry_points.txt`.
pub(crate) fn scripts_from_ini(ini: &str) -> Result<(Vec<Script>, Vec<Script>), Error> {
    let entry_points_mapping = Ini::new_cs()
        .read(ini.to_string())
        .map_err(|err| Error::InvalidWheel(format!("entry_points.txt is invalid: {err}")))?;

    let console_scripts = read_scripts_from_section(&entry_points_mapping, "console_scripts")?;
    let gui_scripts = read_scripts_from_section(&entry_points_mapping, "gui_scripts")?;
    Ok((console_scripts, gui_scripts))
}

fn read_scripts_from_section(
    entry_points_mapping: &std::collections::HashMap<
        String,
        std::collections::HashMap<String, Option<String>>,
    >,
    section_name: &str,
) -> Result<Vec<Script>, Error> {
    let mut scripts = Vec::new();
    if let Some(section) = entry_points_mapping.get(section_name) {
        for (name, value) in section {
            match value {
                Some(value) => scripts.push(Script::from_value(name, value)?),
                None => {
                    return Err(Error::InvalidWheel(format!(
                        "[{section_name}] key {name} must have a value"
                    )));
                }
            }
        }
    }
    // configparser iterates in hash order
    scripts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(scripts)
}

/// A shebang with a long interpreter path or one containing spaces does not
/// survive the kernel's interpreter lookup, route those through `sh`.
pub(crate) fn format_shebang(executable: &Path) -> String {
    let executable = executable.display().to_string();
    if executable.len() > 127 || executable.contains(' ') {
        format!("#!/bin/sh\n'''exec' {executable} \"$0\" \"$@\"\n' '''")
    } else {
        format!("#!{executable}")
    }
}

/// The Python launcher installed for an entry point.
pub(crate) fn get_script_launcher(script: &Script, shebang: &str) -> String {
    let Script {
        module, function, ..
    } = script;
    let import_name = script.import_name();
    format!(
        r#"{shebang}

import sys

from {module} import {import_name}


if __name__ == "__main__":
    sys.exit({function}())
"#
    )
}
