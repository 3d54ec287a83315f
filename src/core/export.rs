//! # Export Serializer
//!
//! Walks the manifest for every enabled payload instance, resolves each key against the
//! Value Store and assembles the `.mobileconfig` document. Resolution during the walk is
//! lenient (see the resolver), but every leaf that ends up in the document is validated
//! strictly here: type, required non-empty strings, `pfm_format`, numeric ranges and
//! `pfm_range_list`. Any violation aborts the export with the offending key path.

use crate::constants::{
    CONFIGURATION_DOMAIN, MCX_FORCED_KEY, MCX_PAYLOAD_TYPE, MCX_SETTINGS_KEY,
    PAYLOAD_CONTENT_KEY, PAYLOAD_DISPLAY_NAME_KEY, PAYLOAD_ENABLED_KEY, PAYLOAD_IDENTIFIER_KEY,
    PAYLOAD_SCOPE_KEY, PAYLOAD_TYPE_KEY, PAYLOAD_UUID_KEY, PAYLOAD_VERSION_KEY,
    RESERVED_PAYLOAD_KEYS, ROOT_PAYLOAD_TYPE,
};
use crate::core::context::ResolutionContext;
use crate::core::enablement::{EnableQuery, Resolver};
use crate::core::manifest::{Domain, ManifestSource, RequireMode, Subkey, SubkeyId};
use crate::core::settings::ProfileSettings;
use crate::core::value::{Value, ValueType};
use crate::core::value_processor;
use crate::models::{ExportStyle, PayloadType, Platforms};
use crate::system::signer::{Signer, SigningError};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

type Map = BTreeMap<String, Value>;

/// Keys injected into every payload before the manifest walk.
const STANDARD_PAYLOAD_KEYS: [&str; 5] = [
    PAYLOAD_TYPE_KEY,
    PAYLOAD_VERSION_KEY,
    PAYLOAD_IDENTIFIER_KEY,
    PAYLOAD_UUID_KEY,
    PAYLOAD_DISPLAY_NAME_KEY,
];

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("'{key_path}' in {domain} ({payload_type}) must be of type {expected}, found {value}.")]
    InvalidType {
        key_path: String,
        domain: String,
        payload_type: PayloadType,
        expected: ValueType,
        value: Value,
    },
    #[error("Invalid value for '{key_path}' in {domain} ({payload_type}): {reason}")]
    InvalidValue {
        key_path: String,
        domain: String,
        payload_type: PayloadType,
        value: Option<Value>,
        reason: String,
    },
    #[error("Manifest error for '{key_path}' in {domain} ({payload_type}): {reason}")]
    ManifestConfiguration {
        key_path: String,
        domain: String,
        payload_type: PayloadType,
        reason: String,
    },
    #[error("Invalid profile root key '{key}': {reason}")]
    InvalidRoot { key: String, value: Option<Value>, reason: String },
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("Failed to serialize the profile: {0}")]
    Serialize(#[from] plist::Error),
    #[error("I/O error while writing '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// How a profile is exported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub style: ExportStyle,
    pub sign: bool,
    /// Certificate reference handed to the signer.
    pub identity: Option<String>,
}

/// A finished export. `bytes` is the XML plist, or the CMS envelope around it when signed.
#[derive(Debug, Clone)]
pub struct ExportedProfile {
    pub document: Value,
    pub bytes: Vec<u8>,
    pub signed: bool,
}

impl ExportedProfile {
    pub fn write_to(&self, path: &Path) -> Result<(), ExportError> {
        std::fs::write(path, &self.bytes).map_err(|source| ExportError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

/// One resolved payload instance, before MCX wrapping.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadContent {
    pub payload_type: PayloadType,
    pub domain: String,
    pub index: usize,
    pub content: Map,
}

pub struct ProfileExporter<'a> {
    manifest: &'a dyn ManifestSource,
    settings: &'a ProfileSettings,
    resolver: Resolver<'a>,
    options: ExportOptions,
    signer: Option<&'a dyn Signer>,
    regexes: HashMap<String, Regex>,
}

impl fmt::Debug for ProfileExporter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileExporter")
            .field("options", &self.options)
            .field("signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

/// Where the walk currently is: which instance, and which array element if any.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    payload_index: usize,
    array_index: Option<usize>,
}

impl<'a> ProfileExporter<'a> {
    pub fn new(
        manifest: &'a dyn ManifestSource,
        settings: &'a ProfileSettings,
        context: &'a mut ResolutionContext,
        options: ExportOptions,
    ) -> Self {
        Self {
            manifest,
            settings,
            resolver: Resolver::new(manifest, settings, context),
            options,
            signer: None,
            regexes: HashMap::new(),
        }
    }

    pub fn with_signer(mut self, signer: &'a dyn Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Builds, validates, serializes and optionally signs the whole profile.
    pub fn export(&mut self) -> Result<ExportedProfile, ExportError> {
        let mut root = self.build_root()?;

        let mut content = Vec::new();
        for payload in self.payload_contents()? {
            content.push(Value::Map(self.apply_style(
                payload.payload_type,
                &payload.domain,
                payload.content,
            )));
        }
        log::info!("Exporting {} payloads.", content.len());
        root.insert(PAYLOAD_CONTENT_KEY.to_string(), Value::List(content));

        if self.resolver.context().platforms().contains(Platforms::MACOS) {
            let scope = self.resolver.context().scope().payload_scope();
            root.insert(PAYLOAD_SCOPE_KEY.to_string(), Value::Str(scope.to_string()));
        }
        validate_root(&root)?;

        let document = Value::Map(root);
        let mut bytes = Vec::new();
        plist::Value::from(document.clone()).to_writer_xml(&mut bytes)?;

        let signed = self.options.sign;
        if signed {
            let identity = self
                .options
                .identity
                .as_deref()
                .ok_or(SigningError::MissingIdentity)?;
            let signer = self.signer.ok_or(SigningError::NoSigner)?;
            bytes = signer.sign(&bytes, identity)?;
        }

        Ok(ExportedProfile {
            document,
            bytes,
            signed,
        })
    }

    /// Every enabled payload instance, resolved but not wrapped.
    pub fn payload_contents(&mut self) -> Result<Vec<PayloadContent>, ExportError> {
        let mut contents = Vec::new();
        for (payload_type, domain, index) in self.settings.enabled_payloads() {
            if let Some(content) = self.export_payload(payload_type, &domain, index)? {
                contents.push(PayloadContent {
                    payload_type,
                    domain,
                    index,
                    content,
                });
            }
        }
        Ok(contents)
    }

    /// Resolves one payload instance. `None` when the instance is disabled or its domain
    /// does not apply to the selected platforms.
    pub fn export_payload(
        &mut self,
        payload_type: PayloadType,
        domain: &str,
        index: usize,
    ) -> Result<Option<Map>, ExportError> {
        if !self.settings.is_payload_enabled(domain, payload_type, index) {
            return Ok(None);
        }
        let Some(stored) = self.settings.payload(domain, payload_type, index) else {
            return Ok(None);
        };

        let mut out = Map::new();
        self.inject_standard_keys(payload_type, domain, index, &mut out);

        match self.manifest.domain(payload_type, domain) {
            Some(definition) => {
                if !definition.platforms.intersects(self.resolver.context().platforms()) {
                    log::info!("Skipping {} #{}: not available on the selected platforms.", domain, index);
                    return Ok(None);
                }
                let cursor = Cursor {
                    payload_index: index,
                    array_index: None,
                };
                self.walk(&definition.subkeys, cursor, true, &mut out)?;
            }
            None => {
                // Custom payloads are exported as stored.
                log::debug!("No manifest for {} ({}), exporting stored keys verbatim.", domain, payload_type);
                if let Some(map) = stored.as_map() {
                    for (k, v) in map {
                        if !STANDARD_PAYLOAD_KEYS.contains(&k.as_str()) {
                            out.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
        }

        out.remove(PAYLOAD_ENABLED_KEY);
        Ok(Some(out))
    }

    // ---MARK: Root ---

    fn build_root(&mut self) -> Result<Map, ExportError> {
        let t = PayloadType::ManifestsApple;
        let mut root = Map::new();
        if let Some(stored) = self
            .settings
            .payload(CONFIGURATION_DOMAIN, t, 0)
            .and_then(Value::as_map)
        {
            for (k, v) in stored {
                root.insert(k.clone(), v.clone());
            }
        }

        if let Some(general) = self.manifest.domain(t, CONFIGURATION_DOMAIN) {
            let cursor = Cursor {
                payload_index: 0,
                array_index: None,
            };
            let mut resolved = Map::new();
            self.walk(&general.subkeys, cursor, true, &mut resolved)?;
            root.extend(resolved);
        }
        root.remove(PAYLOAD_ENABLED_KEY);
        root.remove(PAYLOAD_SCOPE_KEY);
        Ok(root)
    }

    /// Fills in `PayloadType`, `PayloadVersion`, `PayloadIdentifier`, `PayloadUUID` and
    /// `PayloadDisplayName`, preferring stored values.
    fn inject_standard_keys(&self, payload_type: PayloadType, domain: &str, index: usize, out: &mut Map) {
        let stored = |key: &str| {
            self.settings
                .value(key, domain, payload_type, index)
                .filter(|v| !v.is_empty())
                .cloned()
        };

        let uuid = stored(PAYLOAD_UUID_KEY).unwrap_or_else(|| {
            let namespace = self
                .settings
                .root_uuid()
                .and_then(|u| Uuid::parse_str(u).ok())
                .unwrap_or(Uuid::NAMESPACE_OID);
            let name = format!("{}.{}.{}", payload_type, domain, index);
            Value::Str(
                Uuid::new_v5(&namespace, name.as_bytes())
                    .to_string()
                    .to_uppercase(),
            )
        });
        let identifier = stored(PAYLOAD_IDENTIFIER_KEY).unwrap_or_else(|| {
            let root = self.settings.root_identifier().unwrap_or(domain);
            let uuid = uuid.as_str().unwrap_or_default();
            Value::Str(format!("{}.{}.{}", root, domain, uuid))
        });
        let display_name = stored(PAYLOAD_DISPLAY_NAME_KEY).unwrap_or_else(|| {
            let title = self
                .manifest
                .domain(payload_type, domain)
                .and_then(|d| d.title.clone());
            Value::Str(title.unwrap_or_else(|| domain.to_string()))
        });

        out.insert(
            PAYLOAD_TYPE_KEY.to_string(),
            stored(PAYLOAD_TYPE_KEY).unwrap_or_else(|| Value::Str(domain.to_string())),
        );
        out.insert(
            PAYLOAD_VERSION_KEY.to_string(),
            stored(PAYLOAD_VERSION_KEY)
                .filter(|v| v.as_i64().is_some())
                .unwrap_or(Value::Int(1)),
        );
        out.insert(PAYLOAD_IDENTIFIER_KEY.to_string(), identifier);
        out.insert(PAYLOAD_UUID_KEY.to_string(), uuid);
        out.insert(PAYLOAD_DISPLAY_NAME_KEY.to_string(), display_name);
    }

    // ---MARK: Walk ---

    fn walk(
        &mut self,
        ids: &[SubkeyId],
        cursor: Cursor,
        top_level: bool,
        out: &mut Map,
    ) -> Result<(), ExportError> {
        for id in ids {
            let Some(subkey) = self.subkey(*id) else {
                continue;
            };
            if subkey.segmented_control {
                self.walk(&subkey.children, cursor, top_level, out)?;
                continue;
            }
            if subkey.is_dynamic_placeholder() || subkey.key.is_empty() {
                continue;
            }
            if top_level && STANDARD_PAYLOAD_KEYS.contains(&subkey.key.as_str()) {
                continue;
            }
            let skipped = !self.resolver.is_available(subkey.id)
                || self
                    .resolver
                    .is_excluded(subkey.id, cursor.payload_index, cursor.array_index)
                || !self.resolver.is_enabled(
                    subkey.id,
                    cursor.payload_index,
                    EnableQuery::at(cursor.array_index),
                );
            if skipped {
                if self.has_nested_required(subkey) {
                    self.emit_nested_required(subkey, cursor, out)?;
                }
                continue;
            }
            if let Some(value) = self.resolve(subkey, cursor)? {
                out.insert(subkey.key.clone(), value);
            }
        }
        Ok(())
    }

    fn subkey(&self, id: SubkeyId) -> Option<&'a Subkey> {
        let manifest: &'a dyn ManifestSource = self.manifest;
        manifest.subkey(id)
    }

    fn has_nested_required(&self, subkey: &Subkey) -> bool {
        !subkey.is_array()
            && subkey.children.iter().filter_map(|c| self.subkey(*c)).any(|child| {
                child.require == RequireMode::AlwaysNested || self.has_nested_required(child)
            })
    }

    /// Emits the `always-nested` descendants of a pruned container, keeping the
    /// container path that leads to them. The container's own reason for being pruned
    /// does not matter, but each forced key must still be available and not excluded.
    fn emit_nested_required(
        &mut self,
        subkey: &'a Subkey,
        cursor: Cursor,
        out: &mut Map,
    ) -> Result<(), ExportError> {
        let children: Vec<&'a Subkey> = subkey.children.iter().filter_map(|c| self.subkey(*c)).collect();
        let mut inner = Map::new();
        for child in children {
            if !self.resolver.is_available(child.id)
                || self
                    .resolver
                    .is_excluded(child.id, cursor.payload_index, cursor.array_index)
            {
                continue;
            }
            if child.require == RequireMode::AlwaysNested {
                if let Some(value) = self.resolve(child, cursor)? {
                    inner.insert(child.key.clone(), value);
                }
            } else if self.has_nested_required(child) {
                self.emit_nested_required(child, cursor, &mut inner)?;
            }
        }
        if inner.is_empty() {
            return Ok(());
        }
        if subkey.segmented_control {
            out.extend(inner);
        } else {
            log::debug!("Keeping required nested keys of pruned '{}'.", subkey.key_path);
            out.insert(subkey.key.clone(), Value::Map(inner));
        }
        Ok(())
    }

    fn resolve(&mut self, subkey: &'a Subkey, cursor: Cursor) -> Result<Option<Value>, ExportError> {
        match subkey.value_type {
            ValueType::Array if subkey.value_input_type == ValueType::Array => {
                self.resolve_array(subkey, cursor).map(Some)
            }
            ValueType::Dictionary => self.resolve_dictionary(subkey, cursor).map(Some),
            _ => self.resolve_scalar(subkey, cursor),
        }
    }

    fn resolve_array(&mut self, subkey: &'a Subkey, cursor: Cursor) -> Result<Value, ExportError> {
        let stored = self
            .resolver
            .effective_value(subkey.id, cursor.payload_index, cursor.array_index);
        let element = subkey.children.first().and_then(|c| self.subkey(*c));

        let Some(element) = element else {
            return Ok(stored.unwrap_or(Value::List(Vec::new())));
        };

        if element.is_dictionary() && !element.children.is_empty() {
            let count = stored.as_ref().and_then(Value::as_list).map_or(0, Vec::len);
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                let mut item = Map::new();
                let element_cursor = Cursor {
                    payload_index: cursor.payload_index,
                    array_index: Some(i),
                };
                self.walk(&element.children, element_cursor, false, &mut item)?;
                items.push(Value::Map(item));
            }
            return Ok(Value::List(items));
        }

        let items = match stored {
            Some(Value::List(items)) => items,
            Some(other) => {
                return Err(self.invalid_type(subkey, ValueType::Array, other));
            }
            None => Vec::new(),
        };
        items
            .into_iter()
            .map(|item| {
                let item = value_processor::to_stored(element, item);
                item.coerce_to(element.value_type)
                    .map_err(|v| self.invalid_type(element, element.value_type, v))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)
    }

    fn resolve_dictionary(&mut self, subkey: &'a Subkey, cursor: Cursor) -> Result<Value, ExportError> {
        let free_form = subkey.children.is_empty()
            || subkey
                .children
                .iter()
                .filter_map(|c| self.subkey(*c))
                .any(Subkey::is_dynamic_placeholder);

        if free_form {
            let stored = self
                .resolver
                .effective_value(subkey.id, cursor.payload_index, cursor.array_index);
            return match stored {
                Some(Value::Map(map)) => Ok(Value::Map(map)),
                Some(other) => Err(self.invalid_type(subkey, ValueType::Dictionary, other)),
                None => Ok(Value::Map(Map::new())),
            };
        }

        let mut map = Map::new();
        self.walk(&subkey.children, cursor, false, &mut map)?;
        if map.is_empty()
            && let Some(Value::Map(default)) = &subkey.default
        {
            return Ok(Value::Map(default.clone()));
        }
        Ok(Value::Map(map))
    }

    fn resolve_scalar(&mut self, subkey: &'a Subkey, cursor: Cursor) -> Result<Option<Value>, ExportError> {
        let value = self
            .resolver
            .effective_value(subkey.id, cursor.payload_index, cursor.array_index)
            .filter(|v| !v.is_empty())
            .or_else(|| subkey.value_type.empty_value());
        let required = self
            .resolver
            .is_required(subkey.id, cursor.payload_index, cursor.array_index);

        let Some(value) = value else {
            if required {
                return Err(self.invalid_value(subkey, None, "a value is required"));
            }
            return Ok(None);
        };

        let value = if value.value_type() == subkey.value_input_type
            && subkey.value_input_type != subkey.value_type
        {
            value_processor::to_stored(subkey, value)
        } else {
            value
        };
        let value = value
            .coerce_to(subkey.value_type)
            .map_err(|v| self.invalid_type(subkey, subkey.value_type, v))?;

        if let Value::Str(text) = &value {
            if required && text.is_empty() {
                return Err(self.invalid_value(subkey, Some(&value), "a required string is empty"));
            }
            if let Some(pattern) = &subkey.format
                && !text.is_empty()
            {
                let regex = self.regex(subkey, pattern)?;
                if !regex.is_match(text) {
                    let reason = format!("does not match the format '{}'", pattern);
                    return Err(self.invalid_value(subkey, Some(&value), &reason));
                }
            }
        }

        if let Some(number) = value.as_f64()
            && subkey.value_type != ValueType::Boolean
        {
            if let Some(min) = subkey.range_min
                && number < min
            {
                let reason = format!("{} is below the minimum {}", number, min);
                return Err(self.invalid_value(subkey, Some(&value), &reason));
            }
            if let Some(max) = subkey.range_max
                && number > max
            {
                let reason = format!("{} is above the maximum {}", number, max);
                return Err(self.invalid_value(subkey, Some(&value), &reason));
            }
        }

        if let Some(allowed) = &subkey.range_list
            && !value.is_empty()
            && !allowed.iter().any(|a| a.loosely_equals(&value))
        {
            return Err(self.invalid_value(subkey, Some(&value), "is not one of the allowed values"));
        }

        Ok(Some(value))
    }

    fn regex(&mut self, subkey: &Subkey, pattern: &str) -> Result<&Regex, ExportError> {
        if !self.regexes.contains_key(pattern) {
            let compiled = Regex::new(pattern).map_err(|e| ExportError::ManifestConfiguration {
                key_path: subkey.key_path.clone(),
                domain: subkey.domain.clone(),
                payload_type: subkey.payload_type,
                reason: format!("invalid pfm_format '{}': {}", pattern, e),
            })?;
            self.regexes.insert(pattern.to_string(), compiled);
        }
        self.regexes
            .get(pattern)
            .ok_or_else(|| ExportError::ManifestConfiguration {
                key_path: subkey.key_path.clone(),
                domain: subkey.domain.clone(),
                payload_type: subkey.payload_type,
                reason: format!("pfm_format '{}' could not be compiled", pattern),
            })
    }

    fn invalid_type(&self, subkey: &Subkey, expected: ValueType, value: Value) -> ExportError {
        ExportError::InvalidType {
            key_path: subkey.key_path.clone(),
            domain: subkey.domain.clone(),
            payload_type: subkey.payload_type,
            expected,
            value,
        }
    }

    fn invalid_value(&self, subkey: &Subkey, value: Option<&Value>, reason: &str) -> ExportError {
        ExportError::InvalidValue {
            key_path: subkey.key_path.clone(),
            domain: subkey.domain.clone(),
            payload_type: subkey.payload_type,
            value: value.cloned(),
            reason: reason.to_string(),
        }
    }

    // ---MARK: Managed Preferences ---

    fn apply_style(&self, payload_type: PayloadType, domain: &str, content: Map) -> Map {
        match self.options.style {
            ExportStyle::Mcx if payload_type.is_managed_preferences() => wrap_mcx(domain, content),
            ExportStyle::Profile => unwrap_mcx_type(domain, content),
            ExportStyle::Mcx => content,
        }
    }
}

/// Moves every non-reserved key under `{domain: {Forced: [{mcx_preference_settings: ..}]}}`
/// and marks the payload as a Managed Preferences payload.
pub fn wrap_mcx(domain: &str, content: Map) -> Map {
    let (mut payload, settings): (Map, Map) = content
        .into_iter()
        .partition(|(k, _)| RESERVED_PAYLOAD_KEYS.contains(&k.as_str()));

    let forced = Value::Map(BTreeMap::from([(
        MCX_SETTINGS_KEY.to_string(),
        Value::Map(settings),
    )]));
    let domain_entry = Value::Map(BTreeMap::from([(
        MCX_FORCED_KEY.to_string(),
        Value::List(vec![forced]),
    )]));
    payload.insert(
        PAYLOAD_CONTENT_KEY.to_string(),
        Value::Map(BTreeMap::from([(domain.to_string(), domain_entry)])),
    );
    payload.insert(PAYLOAD_TYPE_KEY.to_string(), Value::Str(MCX_PAYLOAD_TYPE.to_string()));
    payload
}

/// Restores the domain as `PayloadType` of a payload still typed as Managed Preferences.
fn unwrap_mcx_type(domain: &str, mut content: Map) -> Map {
    if content.get(PAYLOAD_TYPE_KEY).and_then(Value::as_str) == Some(MCX_PAYLOAD_TYPE) {
        content.insert(PAYLOAD_TYPE_KEY.to_string(), Value::Str(domain.to_string()));
    }
    content
}

fn validate_root(root: &Map) -> Result<(), ExportError> {
    fn non_empty(v: &Value) -> bool {
        v.as_str().is_some_and(|s| !s.trim().is_empty())
    }
    let rules: [(&str, fn(&Value) -> bool, &str); 4] = [
        (
            PAYLOAD_TYPE_KEY,
            |v| v.as_str() == Some(ROOT_PAYLOAD_TYPE),
            "must be \"Configuration\"",
        ),
        (PAYLOAD_VERSION_KEY, |v| *v == Value::Int(1), "must be the integer 1"),
        (PAYLOAD_IDENTIFIER_KEY, non_empty, "must be a non-empty string"),
        (PAYLOAD_UUID_KEY, non_empty, "must be a non-empty string"),
    ];
    for (key, valid, reason) in rules {
        let value = root.get(key);
        if !value.is_some_and(valid) {
            return Err(ExportError::InvalidRoot {
                key: key.to_string(),
                value: value.cloned(),
                reason: reason.to_string(),
            });
        }
    }
    Ok(())
}

/// Domains with a manifest, for callers that list what can be exported.
pub fn exportable_domains(manifest: &dyn ManifestSource) -> Vec<&Domain> {
    manifest
        .domains()
        .into_iter()
        .filter(|d| d.identifier != CONFIGURATION_DOMAIN)
        .collect()
}
