// src/core/plist_export.rs

use crate::constants::RESERVED_PAYLOAD_KEYS;
use crate::core::export::{ExportError, ProfileExporter};
use crate::core::value::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes one `<domain>.plist` per enabled payload instance into `dir`, without the
/// reserved `Payload*` keys. A name that already exists on disk, or was written earlier in
/// the same run, gets a `-1`, `-2`, ... suffix. Returns the written paths in order.
pub fn export_domain_plists(
    exporter: &mut ProfileExporter<'_>,
    dir: &Path,
) -> Result<Vec<PathBuf>, ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut written = Vec::new();
    let mut taken: HashSet<PathBuf> = HashSet::new();
    for payload in exporter.payload_contents()? {
        let content: Value = Value::Map(
            payload
                .content
                .into_iter()
                .filter(|(k, _)| !RESERVED_PAYLOAD_KEYS.contains(&k.as_str()))
                .collect(),
        );

        let path = free_path(dir, &payload.domain, &taken);
        plist::Value::from(content).to_file_xml(&path)?;
        log::info!("Wrote {} #{} to '{}'.", payload.domain, payload.index, path.display());
        taken.insert(path.clone());
        written.push(path);
    }
    Ok(written)
}

fn free_path(dir: &Path, domain: &str, taken: &HashSet<PathBuf>) -> PathBuf {
    let candidate = dir.join(format!("{}.plist", domain));
    if !candidate.exists() && !taken.contains(&candidate) {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{}-{}.plist", domain, n)))
        .find(|p| !p.exists() && !taken.contains(p))
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ResolutionContext;
    use crate::core::export::ExportOptions;
    use crate::core::test_support::{VPN, fixture_manifest, fixture_settings};
    use crate::models::PayloadType;
    use tempfile::tempdir;

    #[test]
    fn test_plists_per_instance_with_collision_suffixes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(format!("{}.plist", VPN)), "existing").unwrap();

        let manifest = fixture_manifest();
        let mut settings = fixture_settings();
        settings.add_payload(VPN, PayloadType::ManifestsApple);
        let mut context = ResolutionContext::default();
        let mut exporter = ProfileExporter::new(&manifest, &settings, &mut context, ExportOptions::default());

        let written = export_domain_plists(&mut exporter, dir.path()).unwrap();
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}-1.plist", VPN), format!("{}-2.plist", VPN)]);

        let content = Value::try_from(plist::Value::from_file(&written[0]).unwrap()).unwrap();
        let map = content.as_map().unwrap();
        assert_eq!(map.get("Name"), Some(&Value::Str("Corporate".into())));
        assert!(map.keys().all(|k| !k.starts_with("Payload")));
    }
}
