//! Shell commands and output handling shared by the glob and grep
//! implementations of every environment.

use crate::error::Error;
use crate::{ExecResult, GrepMatch, GrepOptions, Result};
use globset::GlobBuilder;
use std::borrow::Cow;

/// Upper bound on paths returned by a single glob.
pub(crate) const MAX_GLOB_RESULTS: usize = 1000;

/// Upper bound on matches returned by a single grep unless overridden.
pub(crate) const DEFAULT_MAX_GREP_RESULTS: usize = 500;

const SKIPPED_DIRS: [&str; 2] = [".git", "node_modules"];

pub(crate) fn quote(value: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(value)).into_owned()
}

/// `find` invocation listing every regular file below `root`.
pub(crate) fn find_command(root: &str) -> String {
    let mut command = format!("find {} -type f", quote(root));
    for dir in SKIPPED_DIRS {
        command.push_str(&format!(" -not -path '*/{dir}/*'"));
    }
    command
}

/// Filter a `find` listing rooted at `root` down to paths matching `pattern`.
///
/// Returned paths are relative to `root`, sorted and capped.
pub(crate) fn collect_glob_matches(listing: &str, root: &str, pattern: &str) -> Result<Vec<String>> {
    let pattern = pattern.trim_start_matches("./");
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher();
    let prefix = root.trim_end_matches('/');

    let mut matches: Vec<String> = listing
        .lines()
        .filter_map(|line| {
            let relative = line.strip_prefix(prefix)?.trim_start_matches('/');
            if relative.is_empty() || !matcher.is_match(relative) {
                return None;
            }
            Some(relative.to_string())
        })
        .collect();

    matches.sort();
    matches.truncate(MAX_GLOB_RESULTS);
    Ok(matches)
}

/// Recursive `grep` invocation for `pattern` under `target`.
pub(crate) fn grep_command(pattern: &str, target: &str, options: &GrepOptions) -> String {
    let mut command = String::from("grep -rnIE");
    if options.ignore_case {
        command.push_str(" -i");
    }
    if let Some(include) = &options.include {
        command.push_str(&format!(" --include={}", quote(include)));
    }
    for dir in SKIPPED_DIRS {
        command.push_str(&format!(" --exclude-dir={dir}"));
    }
    command.push_str(&format!(" -e {} -- {}", quote(pattern), quote(target)));
    command
}

/// Interpret grep's exit status and parse its output.
///
/// Exit status 1 means "no matches". Status 2 signals an error, which is only
/// surfaced when nothing could be matched at all (unreadable files alongside
/// real matches also produce status 2).
pub(crate) fn collect_grep_matches(
    command: &str,
    result: &ExecResult,
    options: &GrepOptions,
) -> Result<Vec<GrepMatch>> {
    if result.exit_code == 1 {
        return Ok(Vec::new());
    }

    let mut matches = sandbox_output::parse_grep_output(&result.stdout);
    if result.exit_code != 0 && matches.is_empty() {
        return Err(Error::CommandFailed {
            command: command.to_string(),
            exit_code: result.exit_code,
            stderr: result.stderr.trim().to_string(),
        });
    }

    for grep_match in &mut matches {
        if let Some(stripped) = grep_match.path.strip_prefix("./") {
            grep_match.path = stripped.to_string();
        }
    }
    matches.truncate(options.max_results.unwrap_or(DEFAULT_MAX_GREP_RESULTS));
    Ok(matches)
}
