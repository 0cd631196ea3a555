use std::path::PathBuf;

use crate::consts::{APP_NAME, STORE_ENV};

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("USERPROFILE").map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> Option<PathBuf> {
  std::env::var_os("HOME").map(PathBuf::from)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> Option<PathBuf> {
  std::env::var_os("LOCALAPPDATA").map(|local_appdata| PathBuf::from(local_appdata).join(APP_NAME).join("Cache"))
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> Option<PathBuf> {
  let cache_home = std::env::var_os("XDG_CACHE_HOME")
    .filter(|dir| !dir.is_empty())
    .map(PathBuf::from)
    .or_else(|| home_dir().map(|home| home.join(".cache")))?;
  Some(cache_home.join(APP_NAME))
}

/// Root of the object database.
///
/// `ASSETFORGE_STORE` wins; otherwise `store/` under the cache directory.
/// `None` when neither can be determined.
pub fn store_dir() -> Option<PathBuf> {
  if let Some(dir) = std::env::var_os(STORE_ENV).filter(|dir| !dir.is_empty()) {
    return Some(PathBuf::from(dir));
  }
  cache_dir().map(|dir| dir.join("store"))
}
