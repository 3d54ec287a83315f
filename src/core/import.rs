// src/core/import.rs

//! Reads an exported (optionally signed) `.mobileconfig` back into a `ProfileSettings`.
//!
//! Managed Preferences payloads are unwrapped into their preference domain, payloads whose
//! type no manifest describes are kept verbatim as `Custom`, and every imported key gets an
//! explicit enabled view flag so that a re-export reproduces it.

use crate::constants::{
    CONFIGURATION_DOMAIN, MCX_FORCED_KEY, MCX_PAYLOAD_TYPE, MCX_SETTINGS_KEY, PAYLOAD_CONTENT_KEY,
    PAYLOAD_DISPLAY_NAME_KEY, PAYLOAD_ENABLED_KEY, PAYLOAD_TYPE_KEY, RESERVED_PAYLOAD_KEYS,
    ROOT_PAYLOAD_TYPE,
};
use crate::core::manifest::ManifestSource;
use crate::core::settings::ProfileSettings;
use crate::core::value::Value;
use crate::models::PayloadType;
use crate::system::signer::{Signer, SigningError, is_plain_plist};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

type Map = BTreeMap<String, Value>;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to parse the profile: {0}")]
    Parse(#[from] plist::Error),
    #[error("Not a configuration profile: {0}")]
    NotAProfile(String),
    #[error("The profile is signed and no signer is available to read it.")]
    SignedWithoutUnwrapper,
    #[error("Failed to read the signed profile: {0}")]
    Unwrap(#[source] SigningError),
    #[error("Invalid profile document: {0}")]
    InvalidDocument(String),
}

/// Something the import kept going past.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportIssue {
    MissingPayloadType { index: usize },
    CustomPayloadType { payload_type: String },
    UnknownKeyPath { domain: String, key_path: String },
    UnreadablePayload { index: usize, reason: String },
}

impl fmt::Display for ImportIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPayloadType { index } => {
                write!(f, "payload #{} has no PayloadType and was skipped", index)
            }
            Self::CustomPayloadType { payload_type } => {
                write!(f, "'{}' has no manifest and was imported as a custom payload", payload_type)
            }
            Self::UnknownKeyPath { domain, key_path } => {
                write!(f, "'{}' is not a key of {}", key_path, domain)
            }
            Self::UnreadablePayload { index, reason } => {
                write!(f, "payload #{} was skipped: {}", index, reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedPayload {
    pub payload_type: PayloadType,
    pub domain: String,
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub payloads: Vec<ImportedPayload>,
    pub issues: Vec<ImportIssue>,
}

/// Imports `bytes` into `settings`. The profile metadata replaces the configuration domain;
/// payloads are appended as new instances.
pub fn import_mobileconfig(
    bytes: &[u8],
    manifest: &dyn ManifestSource,
    settings: &mut ProfileSettings,
    unwrapper: Option<&dyn Signer>,
) -> Result<ImportReport, ImportError> {
    let unwrapped;
    let bytes = if is_plain_plist(bytes) {
        bytes
    } else {
        let signer = unwrapper.ok_or(ImportError::SignedWithoutUnwrapper)?;
        unwrapped = signer.extract_content(bytes).map_err(ImportError::Unwrap)?;
        log::debug!("Unwrapped {} bytes of signed content.", unwrapped.len());
        &unwrapped
    };

    let document: plist::Value = plist::from_bytes(bytes)?;
    let plist::Value::Dictionary(mut document) = document else {
        return Err(ImportError::NotAProfile("the root is not a dictionary".to_string()));
    };
    // Payloads convert one at a time; an unreadable payload is skipped on its own.
    let content = match document.remove(PAYLOAD_CONTENT_KEY) {
        Some(plist::Value::Array(items)) => items,
        Some(other) => {
            return Err(ImportError::InvalidDocument(format!(
                "PayloadContent must be an array, found {}",
                plist_kind(&other)
            )));
        }
        None => Vec::new(),
    };
    let root = Value::try_from(plist::Value::Dictionary(document))
        .map_err(|e| ImportError::InvalidDocument(e.to_string()))?;
    let Value::Map(root) = root else {
        return Err(ImportError::NotAProfile("the root is not a dictionary".to_string()));
    };
    match root.get(PAYLOAD_TYPE_KEY).and_then(Value::as_str) {
        Some(ROOT_PAYLOAD_TYPE) => {}
        other => {
            return Err(ImportError::NotAProfile(format!(
                "root PayloadType is {:?}, expected \"{}\"",
                other, ROOT_PAYLOAD_TYPE
            )));
        }
    }

    let title = root
        .get(PAYLOAD_DISPLAY_NAME_KEY)
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut importer = Importer {
        manifest,
        settings,
        report: ImportReport::default(),
    };
    importer.store(CONFIGURATION_DOMAIN, PayloadType::ManifestsApple, root, true);
    if let Some(title) = title {
        importer.settings.set_title(&title);
    }

    for (index, payload) in content.into_iter().enumerate() {
        let payload = match Value::try_from(payload) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Skipping payload #{}: {}", index, e);
                importer.report.issues.push(ImportIssue::UnreadablePayload {
                    index,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let Value::Map(payload) = payload else {
            log::warn!("Skipping payload #{}: not a dictionary.", index);
            importer.report.issues.push(ImportIssue::MissingPayloadType { index });
            continue;
        };
        importer.import_payload(index, payload);
    }

    log::info!(
        "Imported {} payloads with {} issues.",
        importer.report.payloads.len(),
        importer.report.issues.len()
    );
    Ok(importer.report)
}

fn plist_kind(value: &plist::Value) -> &'static str {
    match value {
        plist::Value::Array(_) => "array",
        plist::Value::Dictionary(_) => "dictionary",
        plist::Value::String(_) => "string",
        plist::Value::Integer(_) => "integer",
        plist::Value::Real(_) => "real",
        plist::Value::Boolean(_) => "boolean",
        plist::Value::Date(_) => "date",
        plist::Value::Data(_) => "data",
        _ => "unsupported value",
    }
}

struct Importer<'m, 's> {
    manifest: &'m dyn ManifestSource,
    settings: &'s mut ProfileSettings,
    report: ImportReport,
}

impl Importer<'_, '_> {
    fn import_payload(&mut self, index: usize, payload: Map) {
        let Some(payload_type) = payload
            .get(PAYLOAD_TYPE_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            log::warn!("Payload #{} has no PayloadType.", index);
            self.report.issues.push(ImportIssue::MissingPayloadType { index });
            return;
        };

        if payload_type == MCX_PAYLOAD_TYPE {
            self.import_mcx(payload);
            return;
        }

        self.import_domain(&payload_type, payload);
    }

    /// Splits a Managed Preferences payload into one instance per forced settings block.
    fn import_mcx(&mut self, mut payload: Map) {
        let Some(Value::Map(domains)) = payload.remove(PAYLOAD_CONTENT_KEY) else {
            log::warn!("Managed Preferences payload without a PayloadContent dictionary.");
            return;
        };
        let reserved: Map = payload
            .into_iter()
            .filter(|(k, _)| RESERVED_PAYLOAD_KEYS.contains(&k.as_str()))
            .collect();

        for (domain, entry) in domains {
            let forced = entry
                .get_path(MCX_FORCED_KEY, None)
                .and_then(Value::as_list)
                .cloned()
                .unwrap_or_default();
            for block in forced {
                let Some(Value::Map(preferences)) = block.get_path(MCX_SETTINGS_KEY, None).cloned()
                else {
                    continue;
                };
                let mut instance = reserved.clone();
                instance.extend(preferences);
                instance.insert(PAYLOAD_TYPE_KEY.to_string(), Value::Str(domain.clone()));
                self.import_domain(&domain, instance);
            }
        }
    }

    fn import_domain(&mut self, domain: &str, payload: Map) {
        let payload_type = match self.manifest.find_domain(domain) {
            Some(definition) => definition.payload_type,
            None => {
                self.report.issues.push(ImportIssue::CustomPayloadType {
                    payload_type: domain.to_string(),
                });
                PayloadType::Custom
            }
        };
        let index = self.settings.payload_count(domain, payload_type);
        self.store(domain, payload_type, payload, payload_type != PayloadType::Custom);
        self.report.payloads.push(ImportedPayload {
            payload_type,
            domain: domain.to_string(),
            index,
        });
    }

    /// Writes `payload` as the next instance of the domain (instance 0 for the configuration
    /// domain) and flags its keys as enabled.
    fn store(&mut self, domain: &str, payload_type: PayloadType, mut payload: Map, check_keys: bool) {
        let index = if domain == CONFIGURATION_DOMAIN {
            0
        } else {
            self.settings.payload_count(domain, payload_type)
        };
        payload.insert(PAYLOAD_ENABLED_KEY.to_string(), Value::Bool(true));

        let mut flags = Vec::new();
        self.collect_flags(domain, payload_type, "", &payload, check_keys, &mut flags);

        self.settings.set_payload(domain, payload_type, index, Value::Map(payload));
        for key_path in flags {
            self.settings
                .set_view_enabled(&key_path, domain, payload_type, index, true);
        }
    }

    fn collect_flags(
        &mut self,
        domain: &str,
        payload_type: PayloadType,
        prefix: &str,
        map: &Map,
        check_keys: bool,
        flags: &mut Vec<String>,
    ) {
        let manifest = self.manifest;
        for (key, value) in map {
            if prefix.is_empty() && RESERVED_PAYLOAD_KEYS.contains(&key.as_str()) {
                continue;
            }
            let key_path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            let subkey = manifest
                .lookup(payload_type, domain, &key_path)
                .and_then(|id| manifest.subkey(id));
            if check_keys && subkey.is_none() && domain != CONFIGURATION_DOMAIN {
                self.report.issues.push(ImportIssue::UnknownKeyPath {
                    domain: domain.to_string(),
                    key_path: key_path.clone(),
                });
            }
            flags.push(key_path.clone());

            // Arrays and free-form dictionaries are flagged as a whole.
            let structured = subkey.is_some_and(|s| {
                s.is_dictionary()
                    && !s.children.is_empty()
                    && s.children
                        .iter()
                        .filter_map(|c| manifest.subkey(*c))
                        .all(|c| !c.is_dynamic_placeholder())
            });
            if let Value::Map(inner) = value
                && structured
            {
                self.collect_flags(domain, payload_type, &key_path, inner, check_keys, flags);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ResolutionContext;
    use crate::core::export::{ExportOptions, ProfileExporter, wrap_mcx};
    use crate::core::test_support::{DOCK, VPN, fixture_manifest, fixture_settings};
    use crate::core::value::map_of;
    use crate::models::ExportStyle;

    const T: PayloadType = PayloadType::ManifestsApple;

    fn to_bytes(document: Value) -> Vec<u8> {
        let mut bytes = Vec::new();
        plist::Value::from(document).to_writer_xml(&mut bytes).unwrap();
        bytes
    }

    fn profile_with(payloads: Vec<Value>) -> Vec<u8> {
        to_bytes(map_of([
            ("PayloadType", Value::Str("Configuration".into())),
            ("PayloadVersion", Value::Int(1)),
            ("PayloadIdentifier", Value::Str("com.example.imported".into())),
            ("PayloadUUID", Value::Str("5A3C0B1E-7C1D-4F5B-9E36-0D1A2B3C4D5E".into())),
            ("PayloadDisplayName", Value::Str("Imported".into())),
            ("PayloadContent", Value::List(payloads)),
        ]))
    }

    #[test]
    fn test_export_import_roundtrip_reproduces_the_profile() {
        let manifest = fixture_manifest();
        let mut settings = fixture_settings();
        settings.set_view_enabled("Username", VPN, T, 0, true);
        settings.set_value("Username", VPN, T, 0, Value::Str("alice".into()));
        settings.set_value("Password", VPN, T, 0, Value::Str("secret".into()));
        settings.set_view_enabled("Mode", VPN, T, 0, true);
        settings.set_value("Mode", VPN, T, 0, Value::Str("L2TP".into()));
        let mut context = ResolutionContext::default();
        let first = ProfileExporter::new(&manifest, &settings, &mut context, ExportOptions::default())
            .export()
            .unwrap();

        let mut imported = ProfileSettings::default();
        let report = import_mobileconfig(&first.bytes, &manifest, &mut imported, None).unwrap();
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert_eq!(report.payloads.len(), 1);
        assert_eq!(imported.title(), Some("Example"));
        assert_eq!(imported.view_enabled("Username", VPN, T, 0), Some(true));
        assert_eq!(imported.view_enabled("Nested.Inner", VPN, T, 0), Some(true));

        let mut context = ResolutionContext::default();
        let second = ProfileExporter::new(&manifest, &imported, &mut context, ExportOptions::default())
            .export()
            .unwrap();
        assert_eq!(first.document, second.document);
    }

    #[test]
    fn test_roundtrip_with_array_elements_and_a_second_instance() {
        let manifest = fixture_manifest();
        let mut settings = fixture_settings();
        settings.set_view_enabled("Servers", VPN, T, 0, true);
        settings.set_value_at("Servers[].Host", VPN, T, 0, Some(0), Value::Str("a.example.com".into()));
        settings.set_value_at("Servers[].Host", VPN, T, 0, Some(1), Value::Str("b.example.com".into()));
        settings.set_value_at("Servers[].Port", VPN, T, 0, Some(1), Value::Int(443));
        let second = settings.add_payload(VPN, T);
        settings.set_view_enabled("Mode", VPN, T, second, true);
        settings.set_value("Mode", VPN, T, second, Value::Str("IKEv2".into()));
        let mut context = ResolutionContext::default();
        let first = ProfileExporter::new(&manifest, &settings, &mut context, ExportOptions::default())
            .export()
            .unwrap();

        let mut imported = ProfileSettings::default();
        let report = import_mobileconfig(&first.bytes, &manifest, &mut imported, None).unwrap();
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert_eq!(imported.payload_count(VPN, T), 2);
        assert_eq!(imported.view_enabled("Servers", VPN, T, 0), Some(true));
        assert_eq!(imported.value_at("Servers[].Port", VPN, T, 0, Some(1)), Some(&Value::Int(443)));
        assert_eq!(imported.value_at("Servers[].Port", VPN, T, 0, Some(0)), None);
        assert_eq!(imported.value("Mode", VPN, T, 1), Some(&Value::Str("IKEv2".into())));
        assert_eq!(imported.view_enabled("Mode", VPN, T, 0), None);

        let mut context = ResolutionContext::default();
        let again = ProfileExporter::new(&manifest, &imported, &mut context, ExportOptions::default())
            .export()
            .unwrap();
        assert_eq!(first.document, again.document);
    }

    #[test]
    fn test_roundtrip_of_an_mcx_export() {
        let manifest = fixture_manifest();
        let dock_type = PayloadType::ManagedPreferencesApple;
        let mut settings = fixture_settings();
        let dock = settings.add_payload(DOCK, dock_type);
        settings.set_view_enabled("autohide", DOCK, dock_type, dock, true);
        settings.set_value("autohide", DOCK, dock_type, dock, Value::Bool(true));
        settings.set_view_enabled("tilesize", DOCK, dock_type, dock, true);
        settings.set_value("tilesize", DOCK, dock_type, dock, Value::Int(48));
        let options = || ExportOptions {
            style: ExportStyle::Mcx,
            ..Default::default()
        };
        let mut context = ResolutionContext::default();
        let first = ProfileExporter::new(&manifest, &settings, &mut context, options())
            .export()
            .unwrap();

        let mut imported = ProfileSettings::default();
        let report = import_mobileconfig(&first.bytes, &manifest, &mut imported, None).unwrap();
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert_eq!(imported.payload_count(DOCK, dock_type), 1);
        assert_eq!(imported.value("tilesize", DOCK, dock_type, 0), Some(&Value::Int(48)));

        let mut context = ResolutionContext::default();
        let again = ProfileExporter::new(&manifest, &imported, &mut context, options())
            .export()
            .unwrap();
        assert_eq!(first.document, again.document);
    }

    #[test]
    fn test_unreadable_payload_only_skips_itself() {
        let manifest = fixture_manifest();
        let custom = plist::Dictionary::from_iter([
            ("PayloadType".to_string(), plist::Value::String("com.acme.custom".into())),
            ("Huge".to_string(), plist::Value::Integer(u64::MAX.into())),
        ]);
        let vpn = plist::Dictionary::from_iter([(
            "PayloadType".to_string(),
            plist::Value::String(VPN.into()),
        )]);
        let root = plist::Dictionary::from_iter([
            ("PayloadType".to_string(), plist::Value::String("Configuration".into())),
            ("PayloadVersion".to_string(), plist::Value::Integer(1_i64.into())),
            ("PayloadIdentifier".to_string(), plist::Value::String("com.example.imported".into())),
            ("PayloadUUID".to_string(), plist::Value::String("D".into())),
            (
                "PayloadContent".to_string(),
                plist::Value::Array(vec![plist::Value::Dictionary(custom), plist::Value::Dictionary(vpn)]),
            ),
        ]);
        let mut bytes = Vec::new();
        plist::Value::Dictionary(root).to_writer_xml(&mut bytes).unwrap();

        let mut settings = ProfileSettings::default();
        let report = import_mobileconfig(&bytes, &manifest, &mut settings, None).unwrap();
        assert!(matches!(
            report.issues.as_slice(),
            [ImportIssue::UnreadablePayload { index: 0, .. }]
        ));
        assert_eq!(report.payloads.len(), 1);
        assert_eq!(settings.payload_count("com.acme.custom", PayloadType::Custom), 0);
        assert_eq!(settings.payload_count(VPN, T), 1);
    }

    #[test]
    fn test_unknown_payload_type_is_kept_as_custom() {
        let manifest = fixture_manifest();
        let bytes = profile_with(vec![map_of([
            ("PayloadType", Value::Str("com.acme.custom".into())),
            ("PayloadUUID", Value::Str("A".into())),
            ("Anything", Value::List(vec![Value::Int(1)])),
        ])]);
        let mut settings = ProfileSettings::default();
        let report = import_mobileconfig(&bytes, &manifest, &mut settings, None).unwrap();

        assert_eq!(
            report.issues,
            vec![ImportIssue::CustomPayloadType {
                payload_type: "com.acme.custom".into()
            }]
        );
        assert_eq!(report.payloads[0].payload_type, PayloadType::Custom);
        assert_eq!(
            settings.value("Anything", "com.acme.custom", PayloadType::Custom, 0),
            Some(&Value::List(vec![Value::Int(1)]))
        );

        let mut context = ResolutionContext::default();
        let profile = ProfileExporter::new(&manifest, &settings, &mut context, ExportOptions::default())
            .export()
            .unwrap();
        let exported = profile.document.get_path("PayloadContent", None).and_then(Value::as_list).unwrap();
        assert_eq!(exported[0].get_path("Anything", None), Some(&Value::List(vec![Value::Int(1)])));
    }

    #[test]
    fn test_issues_for_missing_type_and_unknown_keys() {
        let manifest = fixture_manifest();
        let bytes = profile_with(vec![
            map_of([("PayloadUUID", Value::Str("B".into()))]),
            map_of([
                ("PayloadType", Value::Str(VPN.into())),
                ("NotInManifest", Value::Bool(true)),
            ]),
        ]);
        let mut settings = ProfileSettings::default();
        let report = import_mobileconfig(&bytes, &manifest, &mut settings, None).unwrap();

        assert!(report.issues.contains(&ImportIssue::MissingPayloadType { index: 0 }));
        assert!(report.issues.contains(&ImportIssue::UnknownKeyPath {
            domain: VPN.into(),
            key_path: "NotInManifest".into()
        }));
        assert_eq!(settings.payload_count(VPN, T), 1);
    }

    #[test]
    fn test_mcx_payload_is_unwrapped_into_its_domain() {
        let manifest = fixture_manifest();
        let inner = BTreeMap::from([
            ("PayloadUUID".to_string(), Value::Str("C".into())),
            ("autohide".to_string(), Value::Bool(true)),
        ]);
        let bytes = profile_with(vec![Value::Map(wrap_mcx(DOCK, inner))]);
        let mut settings = ProfileSettings::default();
        let report = import_mobileconfig(&bytes, &manifest, &mut settings, None).unwrap();

        let dock = PayloadType::ManagedPreferencesApple;
        assert_eq!(report.payloads[0].payload_type, dock);
        assert_eq!(settings.value("autohide", DOCK, dock, 0), Some(&Value::Bool(true)));
        assert_eq!(settings.value("PayloadUUID", DOCK, dock, 0), Some(&Value::Str("C".into())));
        assert_eq!(settings.view_enabled("autohide", DOCK, dock, 0), Some(true));
    }

    #[test]
    fn test_fatal_errors() {
        let manifest = fixture_manifest();
        let mut settings = ProfileSettings::default();

        let not_root = to_bytes(map_of([("PayloadType", Value::Str(VPN.into()))]));
        assert!(matches!(
            import_mobileconfig(&not_root, &manifest, &mut settings, None),
            Err(ImportError::NotAProfile(_))
        ));
        assert!(matches!(
            import_mobileconfig(&[0x30, 0x82, 0x00], &manifest, &mut settings, None),
            Err(ImportError::SignedWithoutUnwrapper)
        ));
        assert!(matches!(
            import_mobileconfig(b"<?xml version=\"1.0\"?><plist><dict>", &manifest, &mut settings, None),
            Err(ImportError::Parse(_))
        ));
    }
}
