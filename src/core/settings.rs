//! # Value Store
//!
//! `ProfileSettings` holds everything a user has entered for one profile:
//!
//! - **Payload settings**: per (payload type, domain) a list of payload instances, each a
//!   nested `Value::Map` addressed by key paths. These are the values that get exported.
//! - **View settings**: UI bookkeeping kept apart from values: explicit per-key enablement
//!   flags, the selected payload instance and a content hash of each instance.
//!
//! The profile-level metadata lives in instance 0 of the synthetic configuration domain.
//! Every write bumps `revision`, which resolution contexts watch to drop stale memos.

use crate::constants::{
    CONFIGURATION_DOMAIN, PAYLOAD_DISPLAY_NAME_KEY, PAYLOAD_ENABLED_KEY, PAYLOAD_IDENTIFIER_KEY,
    PAYLOAD_TYPE_KEY, PAYLOAD_UUID_KEY, PAYLOAD_VERSION_KEY, ROOT_PAYLOAD_TYPE,
};
use crate::core::events::{EventChannel, SettingsEvent};
use crate::core::manifest::Subkey;
use crate::core::value::Value;
use crate::core::value_processor;
use crate::models::PayloadType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use uuid::Uuid;

/// Identifies a payload domain within the store.
pub type DomainKey = (PayloadType, String);

/// UI bookkeeping for one payload instance.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceView {
    /// Explicit enablement flags keyed by key path.
    #[serde(default)]
    pub enabled: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// UI bookkeeping for one payload domain.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DomainView {
    #[serde(default)]
    pub payload_index_selected: usize,
    #[serde(default)]
    pub instances: Vec<InstanceView>,
}

#[derive(Debug, Default)]
pub struct ProfileSettings {
    payloads: BTreeMap<DomainKey, Vec<Value>>,
    views: BTreeMap<DomainKey, DomainView>,
    revision: u64,
    events: EventChannel,
}

fn key(domain: &str, payload_type: PayloadType) -> DomainKey {
    (payload_type, domain.to_string())
}

fn content_hash(instance: &Value) -> Option<String> {
    let bytes = serde_json::to_vec(&instance.to_json()).ok()?;
    Some(hex::encode(blake3::hash(&bytes).as_bytes()))
}

impl ProfileSettings {
    /// Creates a profile whose configuration domain carries the mandatory root keys.
    pub fn new(identifier: &str, display_name: &str) -> Self {
        let mut settings = Self::default();
        let root = Value::Map(BTreeMap::from([
            (PAYLOAD_TYPE_KEY.to_string(), Value::Str(ROOT_PAYLOAD_TYPE.to_string())),
            (PAYLOAD_VERSION_KEY.to_string(), Value::Int(1)),
            (PAYLOAD_IDENTIFIER_KEY.to_string(), Value::Str(identifier.to_string())),
            (PAYLOAD_UUID_KEY.to_string(), Value::Str(Uuid::new_v4().to_string().to_uppercase())),
            (PAYLOAD_DISPLAY_NAME_KEY.to_string(), Value::Str(display_name.to_string())),
            (PAYLOAD_ENABLED_KEY.to_string(), Value::Bool(true)),
        ]));
        settings.set_payload(CONFIGURATION_DOMAIN, PayloadType::ManifestsApple, 0, root);
        settings
    }

    /// Receives `TitleChanged` notifications.
    pub fn subscribe(&mut self) -> Receiver<SettingsEvent> {
        self.events.subscribe()
    }

    /// Increases on every write. Never decreases.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // --- Values ---

    pub fn value(
        &self,
        key_path: &str,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
    ) -> Option<&Value> {
        self.value_at(key_path, domain, payload_type, payload_index, None)
    }

    /// Like `value`, addressing `[]` segments of the key path with `array_index`.
    pub fn value_at(
        &self,
        key_path: &str,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
        array_index: Option<usize>,
    ) -> Option<&Value> {
        self.payload(domain, payload_type, payload_index)?
            .get_path(key_path, array_index)
    }

    pub fn set_value(
        &mut self,
        key_path: &str,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
        value: Value,
    ) -> bool {
        self.set_value_at(key_path, domain, payload_type, payload_index, None, value)
    }

    /// Stores a raw value, creating the payload instance if needed. Returns `false` when the
    /// key path cannot be materialized (an array segment without a usable index).
    pub fn set_value_at(
        &mut self,
        key_path: &str,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
        array_index: Option<usize>,
        value: Value,
    ) -> bool {
        let title = match (&value, domain, key_path) {
            (Value::Str(s), CONFIGURATION_DOMAIN, PAYLOAD_DISPLAY_NAME_KEY) => Some(s.clone()),
            _ => None,
        };

        let stored = self
            .instance_mut(domain, payload_type, payload_index)
            .is_some_and(|instance| instance.set_path(key_path, array_index, value));
        if !stored {
            log::debug!(
                "Could not store '{}' in {} #{} (array index {:?}).",
                key_path,
                domain,
                payload_index,
                array_index
            );
            return false;
        }
        self.touch(domain, payload_type, payload_index);

        if let Some(title) = title {
            self.events.emit(SettingsEvent::TitleChanged(title));
        }
        true
    }

    pub fn remove_value(
        &mut self,
        key_path: &str,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
        array_index: Option<usize>,
    ) -> Option<Value> {
        let removed = self
            .payloads
            .get_mut(&key(domain, payload_type))?
            .get_mut(payload_index)?
            .remove_path(key_path, array_index);
        if removed.is_some() {
            self.touch(domain, payload_type, payload_index);
        }
        removed
    }

    /// The stored value in its edited form (value processor inverse applied).
    pub fn display_value(
        &self,
        subkey: &Subkey,
        payload_index: usize,
        array_index: Option<usize>,
    ) -> Option<Value> {
        self.value_at(
            &subkey.key_path,
            &subkey.domain,
            subkey.payload_type,
            payload_index,
            array_index,
        )
        .cloned()
        .map(|v| value_processor::to_display(subkey, v))
    }

    /// Stores a value given in its edited form (value processor forward applied).
    pub fn set_display_value(
        &mut self,
        subkey: &Subkey,
        payload_index: usize,
        array_index: Option<usize>,
        value: Value,
    ) -> bool {
        let stored = value_processor::to_stored(subkey, value);
        self.set_value_at(
            &subkey.key_path,
            &subkey.domain,
            subkey.payload_type,
            payload_index,
            array_index,
            stored,
        )
    }

    // --- Profile metadata ---

    pub fn title(&self) -> Option<&str> {
        self.root_value(PAYLOAD_DISPLAY_NAME_KEY)?.as_str()
    }

    pub fn set_title(&mut self, title: &str) {
        self.set_value(
            PAYLOAD_DISPLAY_NAME_KEY,
            CONFIGURATION_DOMAIN,
            PayloadType::ManifestsApple,
            0,
            Value::Str(title.to_string()),
        );
    }

    pub fn root_identifier(&self) -> Option<&str> {
        self.root_value(PAYLOAD_IDENTIFIER_KEY)?.as_str()
    }

    pub fn root_uuid(&self) -> Option<&str> {
        self.root_value(PAYLOAD_UUID_KEY)?.as_str()
    }

    fn root_value(&self, key_path: &str) -> Option<&Value> {
        self.value(key_path, CONFIGURATION_DOMAIN, PayloadType::ManifestsApple, 0)
    }

    // --- Payload instances ---

    /// Appends an enabled payload instance with its own UUID and identifier. Returns its index.
    pub fn add_payload(&mut self, domain: &str, payload_type: PayloadType) -> usize {
        let uuid = Uuid::new_v4().to_string().to_uppercase();
        let identifier = match self.root_identifier() {
            Some(root) => format!("{}.{}.{}", root, domain, uuid),
            None => format!("{}.{}", domain, uuid),
        };
        let instance = Value::Map(BTreeMap::from([
            (PAYLOAD_UUID_KEY.to_string(), Value::Str(uuid)),
            (PAYLOAD_IDENTIFIER_KEY.to_string(), Value::Str(identifier)),
            (PAYLOAD_ENABLED_KEY.to_string(), Value::Bool(true)),
        ]));
        let index = self.payload_count(domain, payload_type);
        self.set_payload(domain, payload_type, index, instance);
        log::debug!("Added payload {} ({}) #{}.", domain, payload_type, index);
        index
    }

    /// Replaces (or creates) a whole payload instance.
    pub fn set_payload(
        &mut self,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
        instance: Value,
    ) {
        let instance = match instance {
            Value::Map(_) => instance,
            other => {
                log::warn!("Payload instance of {} is not a dictionary: {}", domain, other);
                Value::Map(BTreeMap::new())
            }
        };
        if let Some(slot) = self.instance_mut(domain, payload_type, payload_index) {
            *slot = instance;
        }
        self.touch(domain, payload_type, payload_index);
    }

    pub fn remove_payload(
        &mut self,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
    ) -> Option<Value> {
        let k = key(domain, payload_type);
        let instances = self.payloads.get_mut(&k)?;
        if payload_index >= instances.len() {
            return None;
        }
        let removed = instances.remove(payload_index);
        if instances.is_empty() {
            self.payloads.remove(&k);
        }
        if let Some(view) = self.views.get_mut(&k) {
            if payload_index < view.instances.len() {
                view.instances.remove(payload_index);
            }
            let count = view.instances.len();
            view.payload_index_selected = view.payload_index_selected.min(count.saturating_sub(1));
        }
        self.revision += 1;
        Some(removed)
    }

    pub fn payload(
        &self,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
    ) -> Option<&Value> {
        self.payloads
            .get(&key(domain, payload_type))?
            .get(payload_index)
    }

    pub fn payload_count(&self, domain: &str, payload_type: PayloadType) -> usize {
        self.payloads
            .get(&key(domain, payload_type))
            .map_or(0, Vec::len)
    }

    pub fn is_payload_enabled(
        &self,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
    ) -> bool {
        self.value(PAYLOAD_ENABLED_KEY, domain, payload_type, payload_index)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_payload_enabled(
        &mut self,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
        enabled: bool,
    ) {
        self.set_value(
            PAYLOAD_ENABLED_KEY,
            domain,
            payload_type,
            payload_index,
            Value::Bool(enabled),
        );
    }

    /// Every stored domain with its instance count, in a stable order.
    pub fn domains(&self) -> Vec<(PayloadType, &str, usize)> {
        self.payloads
            .iter()
            .map(|((t, d), instances)| (*t, d.as_str(), instances.len()))
            .collect()
    }

    /// Enabled payload instances outside the configuration domain.
    pub fn enabled_payloads(&self) -> Vec<(PayloadType, String, usize)> {
        self.payloads
            .iter()
            .filter(|((_, domain), _)| domain != CONFIGURATION_DOMAIN)
            .flat_map(|((t, domain), instances)| {
                (0..instances.len()).map(move |i| (*t, domain.clone(), i))
            })
            .filter(|(t, domain, i)| self.is_payload_enabled(domain, *t, *i))
            .collect()
    }

    // --- View settings ---

    /// The explicit enablement flag a user set on a key, if any.
    pub fn view_enabled(
        &self,
        key_path: &str,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
    ) -> Option<bool> {
        self.views
            .get(&key(domain, payload_type))?
            .instances
            .get(payload_index)?
            .enabled
            .get(key_path)
            .copied()
    }

    pub fn set_view_enabled(
        &mut self,
        key_path: &str,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
        enabled: bool,
    ) {
        if let Some(view) = self.instance_view_mut(domain, payload_type, payload_index) {
            view.enabled.insert(key_path.to_string(), enabled);
        }
        self.revision += 1;
    }

    pub fn clear_view_enabled(
        &mut self,
        key_path: &str,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
    ) {
        if let Some(view) = self.instance_view_mut(domain, payload_type, payload_index) {
            view.enabled.remove(key_path);
        }
        self.revision += 1;
    }

    pub fn payload_index_selected(&self, domain: &str, payload_type: PayloadType) -> usize {
        self.views
            .get(&key(domain, payload_type))
            .map_or(0, |v| v.payload_index_selected)
    }

    pub fn set_payload_index_selected(
        &mut self,
        domain: &str,
        payload_type: PayloadType,
        index: usize,
    ) {
        self.views
            .entry(key(domain, payload_type))
            .or_default()
            .payload_index_selected = index;
    }

    /// blake3 hash of the instance as last written.
    pub fn content_hash(
        &self,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
    ) -> Option<&str> {
        self.views
            .get(&key(domain, payload_type))?
            .instances
            .get(payload_index)?
            .content_hash
            .as_deref()
    }

    // --- Internals shared with persistence ---

    pub(crate) fn payload_map(&self) -> &BTreeMap<DomainKey, Vec<Value>> {
        &self.payloads
    }

    pub(crate) fn view_map(&self) -> &BTreeMap<DomainKey, DomainView> {
        &self.views
    }

    pub(crate) fn from_parts(
        payloads: BTreeMap<DomainKey, Vec<Value>>,
        views: BTreeMap<DomainKey, DomainView>,
    ) -> Self {
        Self {
            payloads,
            views,
            revision: 0,
            events: EventChannel::default(),
        }
    }

    fn instance_mut(
        &mut self,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
    ) -> Option<&mut Value> {
        let instances = self.payloads.entry(key(domain, payload_type)).or_default();
        if instances.len() <= payload_index {
            instances.resize_with(payload_index + 1, || Value::Map(BTreeMap::new()));
        }
        instances.get_mut(payload_index)
    }

    fn instance_view_mut(
        &mut self,
        domain: &str,
        payload_type: PayloadType,
        payload_index: usize,
    ) -> Option<&mut InstanceView> {
        let view = self.views.entry(key(domain, payload_type)).or_default();
        if view.instances.len() <= payload_index {
            view.instances
                .resize_with(payload_index + 1, InstanceView::default);
        }
        view.instances.get_mut(payload_index)
    }

    fn touch(&mut self, domain: &str, payload_type: PayloadType, payload_index: usize) {
        self.revision += 1;
        let hash = self
            .payload(domain, payload_type, payload_index)
            .and_then(content_hash);
        if let Some(view) = self.instance_view_mut(domain, payload_type, payload_index) {
            view.content_hash = hash;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIFI: &str = "com.apple.wifi.managed";

    #[test]
    fn test_new_profile_has_root_keys() {
        let settings = ProfileSettings::new("com.example.profile", "Example");
        assert_eq!(settings.title(), Some("Example"));
        assert_eq!(settings.root_identifier(), Some("com.example.profile"));
        assert!(settings.root_uuid().is_some_and(|u| Uuid::parse_str(u).is_ok()));
        assert_eq!(
            settings.value(PAYLOAD_TYPE_KEY, CONFIGURATION_DOMAIN, PayloadType::ManifestsApple, 0),
            Some(&Value::Str("Configuration".into()))
        );
    }

    #[test]
    fn test_title_change_emits_exactly_once() {
        let mut settings = ProfileSettings::new("com.example.profile", "Old");
        let rx = settings.subscribe();
        settings.set_value(
            PAYLOAD_DISPLAY_NAME_KEY,
            CONFIGURATION_DOMAIN,
            PayloadType::ManifestsApple,
            0,
            Value::Str("New".into()),
        );
        assert_eq!(settings.title(), Some("New"));
        assert_eq!(rx.try_recv().unwrap(), SettingsEvent::TitleChanged("New".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_add_payload_assigns_identity_and_enables() {
        let mut settings = ProfileSettings::new("com.example.profile", "Example");
        let first = settings.add_payload(WIFI, PayloadType::ManifestsApple);
        let second = settings.add_payload(WIFI, PayloadType::ManifestsApple);
        assert_eq!((first, second), (0, 1));
        assert!(settings.is_payload_enabled(WIFI, PayloadType::ManifestsApple, 1));

        let uuid_a = settings.value(PAYLOAD_UUID_KEY, WIFI, PayloadType::ManifestsApple, 0);
        let uuid_b = settings.value(PAYLOAD_UUID_KEY, WIFI, PayloadType::ManifestsApple, 1);
        assert_ne!(uuid_a, uuid_b);
        let identifier = settings
            .value(PAYLOAD_IDENTIFIER_KEY, WIFI, PayloadType::ManifestsApple, 0)
            .and_then(Value::as_str)
            .unwrap();
        assert!(identifier.starts_with("com.example.profile.com.apple.wifi.managed."));
        assert_eq!(settings.enabled_payloads().len(), 2);
    }

    #[test]
    fn test_writes_bump_revision_and_hash() {
        let mut settings = ProfileSettings::new("com.example.profile", "Example");
        let index = settings.add_payload(WIFI, PayloadType::ManifestsApple);
        let before = settings.revision();
        let hash_before = settings
            .content_hash(WIFI, PayloadType::ManifestsApple, index)
            .map(str::to_string);

        assert!(settings.set_value("SSID_STR", WIFI, PayloadType::ManifestsApple, index, Value::Str("Corp".into())));
        assert!(settings.revision() > before);
        assert_ne!(
            settings.content_hash(WIFI, PayloadType::ManifestsApple, index).map(str::to_string),
            hash_before
        );
    }

    #[test]
    fn test_view_flags_and_removal() {
        let mut settings = ProfileSettings::new("com.example.profile", "Example");
        settings.add_payload(WIFI, PayloadType::ManifestsApple);
        settings.add_payload(WIFI, PayloadType::ManifestsApple);
        settings.set_view_enabled("Password", WIFI, PayloadType::ManifestsApple, 1, true);
        assert_eq!(settings.view_enabled("Password", WIFI, PayloadType::ManifestsApple, 1), Some(true));
        assert_eq!(settings.view_enabled("Password", WIFI, PayloadType::ManifestsApple, 0), None);

        settings.set_payload_index_selected(WIFI, PayloadType::ManifestsApple, 1);
        assert!(settings.remove_payload(WIFI, PayloadType::ManifestsApple, 0).is_some());
        assert_eq!(settings.payload_count(WIFI, PayloadType::ManifestsApple), 1);
        assert_eq!(settings.payload_index_selected(WIFI, PayloadType::ManifestsApple), 0);
        // The remaining instance keeps its flags.
        assert_eq!(settings.view_enabled("Password", WIFI, PayloadType::ManifestsApple, 0), Some(true));
    }
}
