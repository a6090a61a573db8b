//! Well-known locations under the user's home directory.

use std::env;
use std::path::PathBuf;

const EXPORT_DIR: &str = "quill-exports";
const DATA_DIR: &str = ".quill";

/// The user's home directory: `HOME`, then `USERPROFILE`.
pub fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .into_iter()
        .filter_map(|key| env::var_os(key))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Where exports land when no directory is given.
pub fn default_export_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(EXPORT_DIR))
}

/// Where completion transcripts go when logging is enabled without a directory.
pub fn default_log_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(DATA_DIR).join("logs"))
}
