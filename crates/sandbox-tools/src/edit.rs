//! Exact-string replacement used by the edit tool.

use crate::error::Error;
use crate::Result;

/// Replace `old` with `new` in `content`, returning the new content and the
/// number of replacements.
///
/// Without `replace_all`, `old` must occur exactly once.
pub fn apply_edit(content: &str, old: &str, new: &str, replace_all: bool) -> Result<(String, usize)> {
    if old.is_empty() {
        return Err(Error::Edit("old_string must not be empty".into()));
    }
    if old == new {
        return Err(Error::Edit("old_string and new_string are identical".into()));
    }

    let occurrences = content.matches(old).count();
    match occurrences {
        0 => Err(Error::Edit("old_string not found in file".into())),
        1 => Ok((content.replacen(old, new, 1), 1)),
        n if replace_all => Ok((content.replace(old, new), n)),
        n => Err(Error::Edit(format!(
            "old_string occurs {n} times; include more context or set replace_all"
        ))),
    }
}
