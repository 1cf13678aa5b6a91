//! Cleanup of `conda env export` output before it is written back as the
//! environment declaration.
//!
//! Exports carry a host-specific `prefix:` line and a build string on every
//! pinned dependency (`python=3.9.7=h12debd9_1`). Neither is portable, so both
//! are dropped. Anything that does not look like a dependency entry is left
//! untouched.

const PREFIX_KEY: &str = "prefix:";
const ENTRY_MARKER: &str = "- ";
const SEPARATOR: char = '=';

/// Normalize a raw snapshot. The result always ends with a newline.
pub fn normalize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        if line.starts_with(PREFIX_KEY) {
            continue;
        }
        out.push_str(strip_build(line));
        out.push('\n');
    }
    if out.is_empty() {
        out.push('\n');
    }
    out
}

/// Truncate a dependency line just before its second `=`.
fn strip_build(line: &str) -> &str {
    let stripped = line.trim_start();
    if !stripped.starts_with(ENTRY_MARKER) {
        return line;
    }
    let indent = line.len() - stripped.len();
    match stripped.match_indices(SEPARATOR).nth(1) {
        Some((second, _)) => &line[..indent + second],
        None => line,
    }
}
