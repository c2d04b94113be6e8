use std::env;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "KB_DATA_DIR";
pub const DEFAULT_DATA_DIR_NAME: &str = ".data";

pub const SNAPSHOT_FILE_NAME: &str = "vectors.json";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const CONFIG_FILE_NAME: &str = "kb.toml";

/// Data directory: `$KB_DATA_DIR` when set, otherwise `.data` under the
/// current directory.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    match env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_DATA_DIR_NAME),
    }
}

#[must_use]
pub fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SNAPSHOT_FILE_NAME)
}

#[must_use]
pub fn manifest_path(data_dir: &Path) -> PathBuf {
    data_dir.join(MANIFEST_FILE_NAME)
}

#[must_use]
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}
