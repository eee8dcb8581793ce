//! Discovery of the per-user data directory.

use std::env;
use std::path::PathBuf;

/// The directory where cobble keeps its persistent state (the package
/// database and the package cache).
///
/// Resolution order: the `COBBLE_DATA_DIR` environment variable, then
/// `$XDG_DATA_HOME/cobble`, then `~/.local/share/cobble`. Falls back to a
/// relative `.cobble` directory when no home directory can be determined.
pub fn user_data_dir() -> PathBuf {
    if let Some(dir) = env::var_os("COBBLE_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = env::var_os("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("cobble");
        }
    }
    if let Some(home) = env::var_os("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home).join(".local/share/cobble");
        }
    }
    PathBuf::from(".cobble")
}
