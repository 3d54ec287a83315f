// src/core/test_support.rs

use crate::core::manifest::{Manifest, ManifestDefinition, ManifestSource, SubkeyId};
use crate::core::settings::ProfileSettings;
use crate::models::PayloadType;
use serde_json::json;

pub(crate) const VPN: &str = "com.example.vpn";
pub(crate) const DOCK: &str = "com.apple.dock";

pub(crate) fn fixture_manifest() -> Manifest {
    let vpn = json!({
        "pfm_domain": VPN,
        "pfm_title": "Example VPN",
        "pfm_platforms": ["macOS", "iOS"],
        "pfm_subkeys": [
            { "pfm_name": "PayloadDisplayName", "pfm_type": "string", "pfm_require": "always" },
            { "pfm_name": "PayloadUUID", "pfm_type": "string", "pfm_require": "always" },
            { "pfm_name": "Name", "pfm_type": "string", "pfm_require": "always", "pfm_default": "Corporate" },
            {
                "pfm_name": "ModeSelector", "pfm_type": "string", "pfm_segmented_control": true,
                "pfm_subkeys": [
                    { "pfm_name": "Mode", "pfm_type": "string", "pfm_range_list": ["IKEv2", "L2TP"] },
                    {
                        "pfm_name": "Proxy", "pfm_type": "dictionary",
                        "pfm_subkeys": [
                            { "pfm_name": "Host", "pfm_type": "string" },
                            { "pfm_name": "Port", "pfm_type": "integer", "pfm_range_min": 1, "pfm_range_max": 65535 }
                        ]
                    }
                ]
            },
            {
                "pfm_name": "Servers", "pfm_type": "array",
                "pfm_subkeys": [{
                    "pfm_type": "dictionary",
                    "pfm_subkeys": [
                        { "pfm_name": "Host", "pfm_type": "string" },
                        { "pfm_name": "Port", "pfm_type": "integer" }
                    ]
                }]
            },
            {
                "pfm_name": "Primary", "pfm_type": "array", "pfm_range_max": 1,
                "pfm_subkeys": [{
                    "pfm_type": "dictionary",
                    "pfm_subkeys": [{ "pfm_name": "Address", "pfm_type": "string" }]
                }]
            },
            {
                "pfm_name": "Tags", "pfm_type": "array",
                "pfm_subkeys": [{ "pfm_type": "string" }]
            },
            { "pfm_name": "Username", "pfm_type": "string" },
            {
                "pfm_name": "Password", "pfm_type": "string",
                "pfm_conditionals": [{
                    "pfm_target_conditions": [{ "pfm_target": "Username", "pfm_empty": false }],
                    "pfm_require": "always"
                }]
            },
            {
                "pfm_name": "OnDemand", "pfm_type": "boolean",
                "pfm_conditionals": [{
                    "pfm_target_conditions": [{ "pfm_platforms": ["iOS"] }],
                    "pfm_require": "always"
                }]
            },
            {
                "pfm_name": "Legacy", "pfm_type": "string",
                "pfm_exclude": [{
                    "pfm_target_conditions": [{ "pfm_target": "Tags", "pfm_contains_any": ["legacy-off"] }]
                }]
            },
            {
                "pfm_name": "Options", "pfm_type": "dictionary",
                "pfm_subkeys": [{ "pfm_name": "{key}", "pfm_type": "string" }]
            },
            {
                "pfm_name": "Nested", "pfm_type": "dictionary",
                "pfm_subkeys": [
                    { "pfm_name": "Inner", "pfm_type": "string", "pfm_require": "always-nested", "pfm_default": "kept" },
                    { "pfm_name": "Other", "pfm_type": "string" }
                ]
            },
            { "pfm_name": "Expires", "pfm_type": "date", "pfm_type_input": "string" },
            { "pfm_name": "Code", "pfm_type": "string", "pfm_format": "^[A-Z]{3}$" },
            { "pfm_name": "PushOnly", "pfm_type": "string", "pfm_require": "push", "pfm_default": "mdm" },
            { "pfm_name": "Fallback", "pfm_type": "string", "pfm_value_copy": "Name" },
            {
                "pfm_name": "CycleA", "pfm_type": "string",
                "pfm_conditionals": [{ "pfm_target_conditions": [{ "pfm_target": "CycleB", "pfm_present": true }] }]
            },
            {
                "pfm_name": "CycleB", "pfm_type": "string",
                "pfm_conditionals": [{ "pfm_target_conditions": [{ "pfm_target": "CycleA", "pfm_present": true }] }]
            },
            { "pfm_name": "MacOnly", "pfm_type": "boolean", "pfm_platforms": ["macOS"], "pfm_default": true }
        ]
    });

    let dock = json!({
        "pfm_domain": DOCK,
        "pfm_title": "Dock",
        "pfm_payload_type": "managedPreferencesApple",
        "pfm_subkeys": [
            { "pfm_name": "autohide", "pfm_type": "boolean" },
            { "pfm_name": "tilesize", "pfm_type": "integer" }
        ]
    });

    let definitions: Vec<ManifestDefinition> = [vpn, dock]
        .into_iter()
        .map(|d| serde_json::from_value(d).unwrap())
        .collect();
    Manifest::from_definitions(definitions).unwrap()
}

pub(crate) fn vpn_key(manifest: &Manifest, key_path: &str) -> SubkeyId {
    manifest
        .lookup(PayloadType::ManifestsApple, VPN, key_path)
        .unwrap_or_else(|| panic!("no subkey '{}' in fixture", key_path))
}

/// A profile with one enabled VPN payload at index 0.
pub(crate) fn fixture_settings() -> ProfileSettings {
    let mut settings = ProfileSettings::new("com.example.profile", "Example");
    settings.add_payload(VPN, PayloadType::ManifestsApple);
    settings
}
