//! Security checks for agent sandboxes: path traversal and symlink escape
//! validation, and glob-style command allowlists.

pub mod allowlist;
pub mod error;
pub mod path;

pub type Result<T> = std::result::Result<T, error::Error>;

pub use allowlist::{evaluate_allowlist, match_glob};
pub use error::Error;
pub use path::{
    assert_no_symlink_escape, assert_safe_path, assert_within, is_within, normalize, translate,
};
