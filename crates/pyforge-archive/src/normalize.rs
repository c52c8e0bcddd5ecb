/// Normalize a distribution name for use in wheel and sdist filenames and in
/// the `.dist-info` directory name: runs of `-`, `_` and `.` collapse to a
/// single underscore, and the result is lowercased.
///
/// See <https://packaging.python.org/en/latest/specifications/binary-distribution-format/#escaping-and-unicode>.
pub fn dist_info_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_run = false;
    for char in name.chars() {
        if matches!(char, '-' | '_' | '.') {
            if !in_run {
                normalized.push('_');
            }
            in_run = true;
        } else {
            normalized.extend(char.to_lowercase());
            in_run = false;
        }
    }
    normalized
}
