//! Location of sandbox workspace directories on the host.

use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable overriding the workspaces root.
pub const WORKSPACES_DIR_ENV: &str = "POLOS_WORKSPACES_DIR";

/// Workspaces root for this process: `$POLOS_WORKSPACES_DIR`, or
/// `~/.polos/workspaces`.
pub fn default_workspaces_dir() -> PathBuf {
    resolve_workspaces_dir(std::env::var_os(WORKSPACES_DIR_ENV), dirs::home_dir())
}

/// Pure form of [`default_workspaces_dir`].
///
/// Without a home directory the system temp directory stands in for it.
pub fn resolve_workspaces_dir(override_dir: Option<OsString>, home: Option<PathBuf>) -> PathBuf {
    match override_dir {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => home
            .unwrap_or_else(std::env::temp_dir)
            .join(".polos")
            .join("workspaces"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        assert_eq!(
            resolve_workspaces_dir(Some("/data/ws".into()), Some("/home/u".into())),
            PathBuf::from("/data/ws")
        );
    }

    #[test]
    fn test_home_default() {
        assert_eq!(
            resolve_workspaces_dir(None, Some("/home/u".into())),
            PathBuf::from("/home/u/.polos/workspaces")
        );
        assert_eq!(
            resolve_workspaces_dir(Some(OsString::new()), Some("/home/u".into())),
            PathBuf::from("/home/u/.polos/workspaces")
        );
    }
}
