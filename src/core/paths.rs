// src/core/paths.rs

use crate::constants::{APP_CONFIG_FILENAME, APP_DIR};
use lazy_static::lazy_static;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

lazy_static! {
    static ref APP_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Could not create config directory at '{path}': {source}")]
    ConfigDirCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to expand path '{template}': {reason}")]
    Expansion { template: String, reason: String },
}

/// Returns the path to the profilekit configuration directory (`~/.config/profilekit`).
/// Creates it if it doesn't exist.
///
/// This function is memoized: the first call computes and caches the path,
/// subsequent calls return the cached value.
pub fn get_app_config_dir() -> Result<PathBuf, PathError> {
    let mut cached_path_guard = APP_CONFIG_DIR.lock().unwrap_or_else(|e| e.into_inner());

    if let Some(path) = &*cached_path_guard {
        return Ok(path.clone());
    }

    let config_path = dirs::config_dir()
        .ok_or(PathError::ConfigDirNotFound)?
        .join(APP_DIR);

    if !config_path.exists() {
        fs::create_dir_all(&config_path).map_err(|e| PathError::ConfigDirCreation {
            path: config_path.display().to_string(),
            source: e,
        })?;
    }

    *cached_path_guard = Some(config_path.clone());
    Ok(config_path)
}

/// Returns the path to `config.toml` inside the configuration directory.
pub fn get_config_file_path() -> Result<PathBuf, PathError> {
    get_app_config_dir().map(|dir| dir.join(APP_CONFIG_FILENAME))
}

/// Expands `~` and environment variables (`$VAR`, `${VAR}`) in a user-supplied path.
/// Relative results are resolved against `base`.
pub fn expand_path(template: &str, base: &Path) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        reason: e.to_string(),
    })?;
    let path = PathBuf::from(expanded.into_owned());
    let path = if path.is_relative() { base.join(path) } else { path };
    Ok(dunce::simplified(&path).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_resolves_relative_and_env() {
        let base = Path::new("/srv/profiles");
        assert_eq!(expand_path("out", base).unwrap(), PathBuf::from("/srv/profiles/out"));
        assert_eq!(expand_path("/abs/x", base).unwrap(), PathBuf::from("/abs/x"));

        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_path("~/certs", base).unwrap(), home.join("certs"));
        assert!(matches!(
            expand_path("$PROFILEKIT_SURELY_UNSET_VARIABLE/x", base),
            Err(PathError::Expansion { .. })
        ));
    }
}
