//! Glob-style command allowlist matching.
//!
//! Patterns are literal text in which `*` matches any run of characters
//! (including none). Everything else, regex metacharacters included, must
//! match exactly.

use regex::Regex;

/// Check whether `candidate` matches a single allowlist `pattern`.
pub fn match_glob(candidate: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return candidate == pattern;
    }

    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    // An escaped literal pattern always compiles; treat anything else as a miss.
    Regex::new(&format!("^(?s:{body})$"))
        .map(|re| re.is_match(candidate))
        .unwrap_or(false)
}

/// Check whether `command` is permitted by any of `patterns`.
///
/// An empty allowlist permits nothing.
pub fn evaluate_allowlist<S: AsRef<str>>(command: &str, patterns: &[S]) -> bool {
    let command = command.trim();
    patterns
        .iter()
        .any(|pattern| match_glob(command, pattern.as_ref()))
}
