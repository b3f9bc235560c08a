//! Lexical path containment and symlink escape detection.

use crate::error::Error;
use crate::Result;
use path_clean::clean;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Lexically normalize a path, collapsing `.` and `..` segments without
/// touching the filesystem.
pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
    clean(path.as_ref())
}

/// Normalize `root`, anchoring a relative root at the current directory.
fn absolute_root(root: impl AsRef<Path>) -> Result<PathBuf> {
    let root = normalize(root);
    if root.is_absolute() {
        Ok(root)
    } else {
        Ok(normalize(std::env::current_dir()?.join(root)))
    }
}

/// Resolve `path` against `root` and check, lexically, that it stays inside.
///
/// Relative paths are joined onto `root`; absolute paths are taken as-is. A
/// relative root is taken from the current directory. Returns the normalized
/// absolute path on success.
pub fn assert_within(path: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let root = absolute_root(root)?;

    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let resolved = normalize(candidate);

    if !resolved.starts_with(&root) {
        return Err(Error::Traversal {
            path: path.display().to_string(),
            root: root.display().to_string(),
        });
    }

    Ok(resolved)
}

/// Validate that `path` resolves inside `root`, following symlinks.
///
/// Performs the lexical check of [`assert_within`] and then, when the target
/// (or its nearest existing ancestor inside `root`) is present on disk,
/// compares real paths so that a symlink planted inside the workspace cannot
/// be used to reach files outside of it.
pub fn assert_safe_path(path: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<PathBuf> {
    let root = absolute_root(root)?;
    let resolved = assert_within(path, &root)?;
    assert_no_symlink_escape(&resolved, &root)?;
    Ok(resolved)
}

/// Check that the real path of `resolved` stays inside the real path of `root`.
///
/// `resolved` must already be lexically inside `root`. Paths that do not exist
/// yet are checked through their nearest existing ancestor, so writes into a
/// symlinked directory are caught as well.
pub fn assert_no_symlink_escape(resolved: &Path, root: &Path) -> Result<()> {
    let Some(existing) = resolved
        .ancestors()
        .find(|ancestor| ancestor.symlink_metadata().is_ok())
    else {
        return Ok(());
    };

    // The root itself is not on disk yet; nothing below it can be a link.
    if !existing.starts_with(root) {
        return Ok(());
    }

    let real_root = match std::fs::canonicalize(root) {
        Ok(real_root) => real_root,
        Err(_) => return Ok(()),
    };

    let real = match std::fs::canonicalize(existing) {
        Ok(real) => real,
        Err(e) => {
            // Dangling links cannot be resolved, so their destination is unknown.
            if let Ok(target) = std::fs::read_link(existing) {
                return Err(Error::SymlinkEscape {
                    path: existing.display().to_string(),
                    target: target.display().to_string(),
                    root: root.display().to_string(),
                });
            }
            return Err(Error::Io(e));
        }
    };

    if !real.starts_with(&real_root) {
        debug!(
            "Rejecting {}: real path {} is outside {}",
            resolved.display(),
            real.display(),
            real_root.display()
        );
        return Err(Error::SymlinkEscape {
            path: resolved.display().to_string(),
            target: real.display().to_string(),
            root: root.display().to_string(),
        });
    }

    Ok(())
}

/// Lexical containment test: does `path` (resolved against `root` when
/// relative) lie inside `root`?
pub fn is_within(path: impl AsRef<Path>, root: impl AsRef<Path>) -> bool {
    assert_within(path, root).is_ok()
}

/// Translate `path` from one mount root to another.
///
/// `path` is resolved against `from_root` and must stay inside it; the
/// remainder is re-rooted under `to_root`. Docker environments use this to map
/// between the container workdir and the bind-mounted host directory.
pub fn translate(
    path: impl AsRef<Path>,
    from_root: impl AsRef<Path>,
    to_root: impl AsRef<Path>,
) -> Result<PathBuf> {
    let from_root = absolute_root(from_root)?;
    let resolved = assert_within(path, &from_root)?;
    let relative = resolved
        .strip_prefix(&from_root)
        .map_err(|_| Error::Traversal {
            path: resolved.display().to_string(),
            root: from_root.display().to_string(),
        })?;

    if relative.as_os_str().is_empty() {
        Ok(normalize(to_root))
    } else {
        Ok(normalize(to_root.as_ref().join(relative)))
    }
}
