// src/core/manifest_loader.rs

use crate::core::manifest::{Manifest, ManifestDefinition, ManifestError};
use crate::models::PayloadType;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Reads a single manifest definition file. `.json` files are parsed as JSON,
/// everything else as a property list (XML or binary).
pub fn load_definition(path: &Path) -> Result<ManifestDefinition, ManifestError> {
    let display = path.display().to_string();
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ManifestError::Json {
            path: display,
            source,
        })
    } else {
        plist::from_file(path).map_err(|source| ManifestError::Plist {
            path: display,
            source,
        })
    }
}

/// Loads every manifest definition found below `root`.
///
/// The payload type of a definition without `pfm_payload_type` is taken from the
/// closest ancestor folder named after a manifest collection (`ManifestsApple`,
/// `ManagedPreferencesApple`, ...). Files that fail to parse are skipped with a warning so
/// one broken manifest does not hide the rest of the collection.
pub fn load_directory(root: &Path) -> Result<Manifest, ManifestError> {
    let mut manifest = Manifest::default();
    let mut loaded = 0usize;

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_manifest_file(entry.path()) {
            continue;
        }

        let mut definition = match load_definition(entry.path()) {
            Ok(definition) => definition,
            Err(e) => {
                log::warn!("Skipping manifest: {}", e);
                continue;
            }
        };
        if definition.payload_type.is_none() {
            definition.payload_type = folder_payload_type(entry.path(), root);
        }

        match manifest.add_definition(definition) {
            Ok(()) => loaded += 1,
            Err(e) => log::warn!("Skipping manifest '{}': {}", entry.path().display(), e),
        }
    }

    log::info!(
        "Loaded {} manifest domains ({} subkeys) from '{}'.",
        loaded,
        manifest.subkey_count(),
        root.display()
    );
    Ok(manifest)
}

fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "plist" | "json"))
}

fn folder_payload_type(path: &Path, root: &Path) -> Option<PayloadType> {
    path.ancestors()
        .skip(1)
        .take_while(|ancestor| ancestor.starts_with(root))
        .filter_map(|ancestor| ancestor.file_name()?.to_str())
        .find_map(PayloadType::from_folder_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::ManifestSource;
    use tempfile::tempdir;

    #[test]
    fn test_payload_type_comes_from_folder() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("ManagedPreferencesApple");
        fs::create_dir_all(&folder).unwrap();
        fs::write(
            folder.join("com.apple.dock.json"),
            r#"{"pfm_domain": "com.apple.dock", "pfm_subkeys": [{"pfm_name": "autohide", "pfm_type": "boolean"}]}"#,
        )
        .unwrap();

        let manifest = load_directory(dir.path()).unwrap();
        assert!(
            manifest
                .domain(PayloadType::ManagedPreferencesApple, "com.apple.dock")
                .is_some()
        );
        assert!(
            manifest
                .lookup(PayloadType::ManagedPreferencesApple, "com.apple.dock", "autohide")
                .is_some()
        );
    }

    #[test]
    fn test_plist_definition_and_broken_file() {
        let dir = tempdir().unwrap();
        let folder = dir.path().join("ManifestsApple");
        fs::create_dir_all(&folder).unwrap();
        fs::write(
            folder.join("com.apple.wifi.managed.plist"),
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>pfm_domain</key>
    <string>com.apple.wifi.managed</string>
    <key>pfm_title</key>
    <string>Wi-Fi</string>
    <key>pfm_subkeys</key>
    <array>
        <dict>
            <key>pfm_name</key>
            <string>SSID_STR</string>
            <key>pfm_type</key>
            <string>string</string>
            <key>pfm_require</key>
            <string>always</string>
        </dict>
    </array>
</dict>
</plist>"#,
        )
        .unwrap();
        fs::write(folder.join("broken.plist"), "not a plist").unwrap();

        let manifest = load_directory(dir.path()).unwrap();
        let domain = manifest
            .domain(PayloadType::ManifestsApple, "com.apple.wifi.managed")
            .unwrap();
        assert_eq!(domain.title.as_deref(), Some("Wi-Fi"));
        assert_eq!(manifest.domains().len(), 1);
    }
}
