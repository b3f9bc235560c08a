//! Output shaping for sandboxed commands: truncation, binary detection, ANSI
//! stripping and grep output parsing.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default cap on characters returned to the agent from a single stream.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 100_000;

/// Number of leading bytes inspected by [`is_binary`].
pub const BINARY_SNIFF_BYTES: usize = 8 * 1024;

lazy_static! {
    static ref ANSI_CSI: Regex = Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").unwrap();
    static ref GREP_LINE: Regex = Regex::new(r"^(.+?):(\d+):(.*)$").unwrap();
}

/// Text after truncation, with a flag telling whether anything was cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub text: String,
    pub truncated: bool,
}

/// A single `path:line:text` match reported by grep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line: u64,
    pub text: String,
}

/// Cap `text` at `max` characters.
///
/// Text within the limit is returned unchanged. Longer text keeps the first
/// 20% of the budget and the last 80%, joined by a marker stating how many
/// characters were omitted.
pub fn truncate_output(text: &str, max: usize) -> Truncated {
    let total = text.chars().count();
    if total <= max {
        return Truncated {
            text: text.to_string(),
            truncated: false,
        };
    }

    // floor(max * 0.2) from the start, the rest of the budget from the end
    let head_len = max / 5;
    let tail_len = max - head_len;
    let omitted = total - head_len - tail_len;

    let head: String = text.chars().take(head_len).collect();
    let tail: String = text.chars().skip(total - tail_len).collect();

    Truncated {
        text: format!("{head}\n\n... [{omitted} characters truncated] ...\n\n{tail}"),
        truncated: true,
    }
}

/// Heuristic binary check: a NUL byte within the first 8 KiB.
pub fn is_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    window.contains(&0)
}

/// Remove ANSI CSI escape sequences (colors, cursor movement) from `text`.
pub fn strip_ansi(text: &str) -> String {
    ANSI_CSI.replace_all(text, "").into_owned()
}

/// Parse `grep -n` style output into matches, dropping lines that do not
/// have the `path:line:text` shape.
pub fn parse_grep_output(text: &str) -> Vec<GrepMatch> {
    text.lines()
        .filter_map(|line| {
            let captures = GREP_LINE.captures(line)?;
            let line_number = captures.get(2)?.as_str().parse().ok()?;
            Some(GrepMatch {
                path: captures.get(1)?.as_str().to_string(),
                line: line_number,
                text: captures.get(3)?.as_str().to_string(),
            })
        })
        .collect()
}
