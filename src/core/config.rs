// src/core/config.rs

use crate::core::paths::{self, PathError};
use crate::models::{Distribution, ExportStyle, Platforms, Scope};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("Failed to access config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize the default config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Contents of `config.toml`. Every field falls back to its default when absent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding manifest definition files (`~` and `$VAR` allowed).
    pub manifest_dir: Option<String>,
    pub profile: ProfileDefaults,
    pub signing: SigningConfig,
}

/// Values a new profile starts with.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProfileDefaults {
    pub organization: Option<String>,
    pub identifier_prefix: String,
    pub disable_optional_keys: bool,
    pub export_style: ExportStyle,
    pub distribution: Distribution,
    pub platforms: Platforms,
    pub scope: Scope,
}

impl Default for ProfileDefaults {
    fn default() -> Self {
        Self {
            organization: None,
            identifier_prefix: "com.example".to_string(),
            disable_optional_keys: true,
            export_style: ExportStyle::default(),
            distribution: Distribution::default(),
            platforms: Platforms::default(),
            scope: Scope::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SigningConfig {
    /// Identity used when `export --sign` is given without `--identity`.
    pub identity: Option<String>,
    /// Directory searched for `<identity>.pem` or `<identity>.crt` + `<identity>.key`.
    pub certificates_dir: Option<String>,
    pub openssl: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            identity: None,
            certificates_dir: None,
            openssl: "openssl".to_string(),
        }
    }
}

impl AppConfig {
    /// Resolved manifest directory, if one is configured.
    pub fn manifest_dir(&self, base: &Path) -> Result<Option<PathBuf>, PathError> {
        self.manifest_dir
            .as_deref()
            .map(|dir| paths::expand_path(dir, base))
            .transpose()
    }

    /// Resolved certificates directory. Defaults to `certificates/` in the config directory.
    pub fn certificates_dir(&self, base: &Path) -> Result<PathBuf, PathError> {
        match self.signing.certificates_dir.as_deref() {
            Some(dir) => paths::expand_path(dir, base),
            None => Ok(paths::get_app_config_dir()?.join("certificates")),
        }
    }
}

/// Loads the user's `config.toml`, writing the defaults there first if it doesn't exist.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    let path = paths::get_config_file_path()?;
    load_or_init(&path)
}

pub fn load_or_init(path: &Path) -> Result<AppConfig, ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    };
    if !path.exists() {
        let default_config = AppConfig::default();
        let toml_string = toml::to_string_pretty(&default_config)?;
        fs::write(path, toml_string).map_err(io_error)?;
        log::info!("Wrote default configuration to '{}'.", path.display());
        return Ok(default_config);
    }
    let content = fs::read_to_string(path).map_err(io_error)?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_config_is_written_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = load_or_init(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.profile.disable_optional_keys);
        assert!(path.exists());
        assert_eq!(load_or_init(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "manifest_dir = \"manifests\"\n[profile]\nplatforms = [\"macOS\", \"iOS\"]\ndistribution = \"push\"\n",
        )
        .unwrap();
        let config = load_or_init(&path).unwrap();
        assert_eq!(config.profile.platforms, Platforms::MACOS | Platforms::IOS);
        assert_eq!(config.profile.distribution, Distribution::Push);
        assert_eq!(config.profile.identifier_prefix, "com.example");
        assert_eq!(config.signing.openssl, "openssl");
        assert_eq!(
            config.manifest_dir(dir.path()).unwrap(),
            Some(dir.path().join("manifests"))
        );
    }

    #[test]
    fn test_invalid_config_reports_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[profile]\nplatforms = [\"amiga\"]\n").unwrap();
        assert!(matches!(load_or_init(&path), Err(ConfigError::Parse { .. })));
    }
}
