// src/core/persistence.rs

//! The on-disk settings document.
//!
//! A profile is saved as an XML property list carrying a `Version`. Documents written
//! before versioning (no `Version` key) are read as legacy: only the title and the payload
//! settings are restored from them.

use crate::constants::{CONFIGURATION_DOMAIN, SETTINGS_DOCUMENT_VERSION};
use crate::core::settings::{DomainKey, DomainView, ProfileSettings};
use crate::core::value::Value;
use crate::models::{Distribution, ExportStyle, PayloadType, Platforms, Scope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error for settings file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read or write settings file '{path}': {source}")]
    Plist {
        path: String,
        #[source]
        source: plist::Error,
    },
    #[error("Settings document version {found} is newer than the supported version {supported}.")]
    UnsupportedVersion { found: u64, supported: u64 },
}

/// Values and view settings grouped as `payload type name -> domain -> instances`.
pub type Grouped<T> = BTreeMap<String, BTreeMap<String, T>>;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SettingsDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub payload_settings: Grouped<Vec<Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub view_settings: Grouped<DomainView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Platforms>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_style: Option<ExportStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_optional_keys: Option<bool>,
}

impl SettingsDocument {
    pub fn is_legacy(&self) -> bool {
        self.version.is_none()
    }

    /// Groups the store by payload type name and domain.
    pub fn capture(settings: &ProfileSettings) -> Self {
        Self {
            version: Some(SETTINGS_DOCUMENT_VERSION),
            title: settings.title().map(str::to_string),
            payload_settings: group(settings.payload_map()),
            view_settings: group(settings.view_map()),
            ..Default::default()
        }
    }

    /// Rebuilds the store. Legacy documents lose their view settings. Groups under an
    /// unknown payload type name are skipped with a warning.
    pub fn restore_settings(&self) -> ProfileSettings {
        let payloads = ungroup(&self.payload_settings);
        let views = if self.is_legacy() {
            BTreeMap::new()
        } else {
            ungroup(&self.view_settings)
        };
        let mut settings = ProfileSettings::from_parts(payloads, views);
        if settings.title().is_none()
            && let Some(title) = &self.title
        {
            settings.set_title(title);
        }
        if settings
            .payload(CONFIGURATION_DOMAIN, PayloadType::ManifestsApple, 0)
            .is_none()
        {
            log::warn!("Settings document has no profile metadata.");
        }
        settings
    }

    pub fn read(path: &Path) -> Result<Self, PersistenceError> {
        let document: Self = plist::from_file(path).map_err(|source| PersistenceError::Plist {
            path: path.display().to_string(),
            source,
        })?;
        match document.version {
            None => log::info!("'{}' is a legacy settings document.", path.display()),
            Some(found) if found > SETTINGS_DOCUMENT_VERSION => {
                return Err(PersistenceError::UnsupportedVersion {
                    found,
                    supported: SETTINGS_DOCUMENT_VERSION,
                });
            }
            Some(_) => {}
        }
        Ok(document)
    }

    pub fn write(&self, path: &Path) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        plist::to_file_xml(path, self).map_err(|source| PersistenceError::Plist {
            path: path.display().to_string(),
            source,
        })?;
        log::debug!("Saved settings to '{}'.", path.display());
        Ok(())
    }
}

fn group<T: Clone>(items: &BTreeMap<DomainKey, T>) -> Grouped<T> {
    let mut grouped: Grouped<T> = BTreeMap::new();
    for ((payload_type, domain), item) in items {
        grouped
            .entry(payload_type.as_str().to_string())
            .or_default()
            .insert(domain.clone(), item.clone());
    }
    grouped
}

fn ungroup<T: Clone>(grouped: &Grouped<T>) -> BTreeMap<DomainKey, T> {
    let mut items = BTreeMap::new();
    for (type_name, domains) in grouped {
        let Some(payload_type) = PayloadType::from_name(type_name) else {
            log::warn!("Skipping settings of unknown payload type '{}'.", type_name);
            continue;
        };
        for (domain, item) in domains {
            items.insert((payload_type, domain.clone()), item.clone());
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{VPN, fixture_settings};
    use tempfile::tempdir;

    const T: PayloadType = PayloadType::ManifestsApple;

    #[test]
    fn test_write_then_read_restores_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("profile.plist");
        let mut settings = fixture_settings();
        settings.set_value("Username", VPN, T, 0, Value::Str("alice".into()));
        settings.set_view_enabled("Username", VPN, T, 0, true);

        let mut document = SettingsDocument::capture(&settings);
        document.platforms = Some(Platforms::MACOS | Platforms::IOS);
        document.write(&path).unwrap();

        let read = SettingsDocument::read(&path).unwrap();
        assert_eq!(read, document);
        let restored = read.restore_settings();
        assert_eq!(restored.value("Username", VPN, T, 0), Some(&Value::Str("alice".into())));
        assert_eq!(restored.view_enabled("Username", VPN, T, 0), Some(true));
        assert_eq!(restored.title(), Some("Example"));
    }

    #[test]
    fn test_legacy_document_drops_view_settings() {
        let settings = fixture_settings();
        let mut document = SettingsDocument::capture(&settings);
        document.version = None;
        document
            .view_settings
            .entry(T.as_str().to_string())
            .or_default()
            .insert(VPN.to_string(), DomainView::default());

        let restored = document.restore_settings();
        assert!(restored.view_map().is_empty());
        assert!(restored.is_payload_enabled(VPN, T, 0));
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("future.plist");
        let document = SettingsDocument {
            version: Some(SETTINGS_DOCUMENT_VERSION + 1),
            ..Default::default()
        };
        document.write(&path).unwrap();
        assert!(matches!(
            SettingsDocument::read(&path),
            Err(PersistenceError::UnsupportedVersion { found: 2, supported: 1 })
        ));
    }

    #[test]
    fn test_corrupt_document_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.plist");
        std::fs::write(&path, "not a plist").unwrap();
        let err = SettingsDocument::read(&path).unwrap_err();
        assert!(err.to_string().contains("broken.plist"));
    }
}
