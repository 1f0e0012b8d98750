//! Show-command output normalization.

use regex::Regex;
use std::sync::LazyLock;

/// Cleans raw command output before column slicing.
///
/// Removes ANSI escape sequences and backspace overstrikes, converts `\r\n`
/// and bare `\r` to `\n`, and trims trailing whitespace from every line.
/// Leading whitespace is preserved because it marks continuation lines.
pub fn normalize_output(raw: &str) -> String {
    static ANSI_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("static regex must compile"));
    static OVERSTRIKE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r".\x08").expect("static regex must compile"));

    let stripped = ANSI_RE.replace_all(raw, "");
    let mut cleaned = stripped.into_owned();
    while OVERSTRIKE_RE.is_match(&cleaned) {
        cleaned = OVERSTRIKE_RE.replace_all(&cleaned, "").into_owned();
    }
    let replaced = cleaned.replace("\r\n", "\n").replace('\r', "\n");

    replaced
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}
