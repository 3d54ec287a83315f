//! # Manifest Schema
//!
//! The read-only schema the engine resolves against: one `Domain` per payload domain,
//! each owning a tree of `Subkey` nodes stored in a flat arena and addressed by interned
//! `SubkeyId`s. Conditions are interned too (`ConditionId`) so their match results can
//! be memoized by identity.
//!
//! The schema is built from ProfileManifests-style definitions (`pfm_*` keys), which can
//! be deserialized from plist or JSON. The engine itself only talks to the
//! [`ManifestSource`] trait.

use crate::core::value::{Value, ValueType};
use crate::models::{Distribution, PayloadType, Platforms, Scope};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Interned identifier of a subkey inside one `Manifest`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubkeyId(u32);

/// Interned identifier of a single condition inside one `Manifest`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionId(u32);

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("I/O error while reading manifest '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse property list manifest '{path}': {source}")]
    Plist {
        path: String,
        #[source]
        source: plist::Error,
    },
    #[error("Failed to parse JSON manifest '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to walk manifest directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Manifest has an empty 'pfm_domain'.")]
    EmptyDomain,
    #[error("Domain '{domain}' ({payload_type}) is defined more than once.")]
    DuplicateDomain {
        domain: String,
        payload_type: PayloadType,
    },
    #[error("Key path '{key_path}' is declared more than once in domain '{domain}'.")]
    DuplicateKeyPath { domain: String, key_path: String },
    #[error("Default value {value} of '{key_path}' in '{domain}' is not of declared type '{expected}'.")]
    InvalidDefault {
        domain: String,
        key_path: String,
        expected: ValueType,
        value: Value,
    },
}

/// Declared necessity of a subkey (`pfm_require`).
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RequireMode {
    Always,
    /// Required even when its container would otherwise be pruned.
    AlwaysNested,
    /// Required only when the profile is distributed over MDM push.
    Push,
    #[default]
    Never,
}

// --- RUNTIME SCHEMA ---

/// One predicate group targeting another key. Matches when at least one predicate fires.
#[derive(Debug, Clone)]
pub struct Condition {
    pub id: ConditionId,
    /// Key path of the key whose state is inspected. Relative paths are resolved
    /// against the asking key's container first.
    pub target: Option<String>,
    pub is_present: Option<bool>,
    pub is_empty: Option<bool>,
    pub range_list: Option<Vec<Value>>,
    pub not_range_list: Option<Vec<Value>>,
    pub contains_any: Option<Vec<Value>>,
    pub not_contains_any: Option<Vec<Value>>,
    pub platforms: Option<Platforms>,
    pub not_platforms: Option<Platforms>,
    pub distribution: Option<Distribution>,
}

impl Condition {
    /// Whether any predicate that depends on the target's value is declared.
    pub fn has_value_predicate(&self) -> bool {
        self.is_present.is_some()
            || self.is_empty.is_some()
            || self.range_list.is_some()
            || self.not_range_list.is_some()
            || self.contains_any.is_some()
            || self.not_contains_any.is_some()
    }
}

/// A `pfm_conditionals` entry: a list of conditions and the requirement it imposes.
#[derive(Debug, Clone)]
pub struct Conditional {
    pub require: RequireMode,
    pub conditions: Vec<Condition>,
}

/// One node of the schema tree.
#[derive(Debug, Clone)]
pub struct Subkey {
    pub id: SubkeyId,
    pub payload_type: PayloadType,
    pub domain: String,
    /// Dictionary key as exported. Empty for array element templates and
    /// some segmented controls.
    pub key: String,
    pub key_path: String,
    pub value_type: ValueType,
    /// The type the value is edited as. Differs from `value_type` when a value
    /// processor converts between the two.
    pub value_input_type: ValueType,
    pub default: Option<Value>,
    pub default_enabled: Option<bool>,
    pub require: RequireMode,
    pub conditionals: Vec<Conditional>,
    pub excludes: Vec<Vec<Condition>>,
    pub platforms: Platforms,
    pub scope: Scope,
    pub parent: Option<SubkeyId>,
    pub children: Vec<SubkeyId>,
    pub range_min: Option<f64>,
    pub range_max: Option<f64>,
    pub range_list: Option<Vec<Value>>,
    pub format: Option<String>,
    pub value_processor: Option<String>,
    /// Key path whose value is copied in when this key holds nothing.
    pub value_copy: Option<String>,
    /// UI-only grouping marker. Its children are exported into its parent's container.
    pub segmented_control: bool,
}

impl Subkey {
    /// `{key}` / `{value}` placeholder children of a free-form dictionary.
    pub fn is_dynamic_placeholder(&self) -> bool {
        self.key.starts_with('{') && self.key.ends_with('}')
    }

    /// An array declared to hold at most one element.
    pub fn is_single_element_array(&self) -> bool {
        self.value_type == ValueType::Array && self.range_max == Some(1.0)
    }

    pub fn is_array(&self) -> bool {
        self.value_type == ValueType::Array
    }

    pub fn is_dictionary(&self) -> bool {
        self.value_type == ValueType::Dictionary
    }

    /// Whether every condition of every conditional and exclude is listed, in order.
    pub fn all_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditionals
            .iter()
            .flat_map(|c| c.conditions.iter())
            .chain(self.excludes.iter().flatten())
    }
}

/// A payload domain and its top-level subkeys.
#[derive(Debug, Clone)]
pub struct Domain {
    pub payload_type: PayloadType,
    pub identifier: String,
    pub title: Option<String>,
    pub platforms: Platforms,
    pub scope: Scope,
    pub subkeys: Vec<SubkeyId>,
}

/// Read-only access to a manifest schema. This is the only surface the resolver and
/// the exporter depend on.
pub trait ManifestSource {
    fn subkey(&self, id: SubkeyId) -> Option<&Subkey>;
    fn lookup(&self, payload_type: PayloadType, domain: &str, key_path: &str) -> Option<SubkeyId>;
    fn domain(&self, payload_type: PayloadType, domain: &str) -> Option<&Domain>;
    /// Finds a domain by identifier regardless of payload type, preferring Apple manifests.
    fn find_domain(&self, domain: &str) -> Option<&Domain>;
    fn domains(&self) -> Vec<&Domain>;
}

// --- DEFINITIONS (what is read from manifest files) ---

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ManifestDefinition {
    #[serde(rename = "pfm_domain")]
    pub domain: String,
    #[serde(rename = "pfm_title", default)]
    pub title: Option<String>,
    #[serde(rename = "pfm_payload_type", default)]
    pub payload_type: Option<PayloadType>,
    #[serde(rename = "pfm_platforms", default)]
    pub platforms: Option<Platforms>,
    #[serde(rename = "pfm_scope", default)]
    pub scope: Option<Scope>,
    #[serde(rename = "pfm_subkeys", default)]
    pub subkeys: Vec<SubkeyDefinition>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SubkeyDefinition {
    #[serde(rename = "pfm_name", default)]
    pub name: Option<String>,
    #[serde(rename = "pfm_type")]
    pub value_type: ValueType,
    #[serde(rename = "pfm_type_input", default)]
    pub value_input_type: Option<ValueType>,
    #[serde(rename = "pfm_default", default)]
    pub default: Option<Value>,
    #[serde(rename = "pfm_default_enabled", default)]
    pub default_enabled: Option<bool>,
    #[serde(rename = "pfm_require", default)]
    pub require: RequireMode,
    #[serde(rename = "pfm_conditionals", default)]
    pub conditionals: Vec<ConditionalDefinition>,
    #[serde(rename = "pfm_exclude", default)]
    pub exclude: Vec<ExcludeDefinition>,
    #[serde(rename = "pfm_platforms", default)]
    pub platforms: Option<Platforms>,
    #[serde(rename = "pfm_scope", default)]
    pub scope: Option<Scope>,
    #[serde(rename = "pfm_range_min", default)]
    pub range_min: Option<f64>,
    #[serde(rename = "pfm_range_max", default)]
    pub range_max: Option<f64>,
    #[serde(rename = "pfm_range_list", default)]
    pub range_list: Option<Vec<Value>>,
    #[serde(rename = "pfm_format", default)]
    pub format: Option<String>,
    #[serde(rename = "pfm_value_processor", default)]
    pub value_processor: Option<String>,
    #[serde(rename = "pfm_value_copy", default)]
    pub value_copy: Option<String>,
    #[serde(rename = "pfm_segmented_control", default)]
    pub segmented_control: bool,
    #[serde(rename = "pfm_subkeys", default)]
    pub subkeys: Vec<SubkeyDefinition>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ConditionalDefinition {
    #[serde(rename = "pfm_target_conditions", default)]
    pub target_conditions: Vec<ConditionDefinition>,
    #[serde(rename = "pfm_require", default = "default_conditional_require")]
    pub require: RequireMode,
}

fn default_conditional_require() -> RequireMode {
    RequireMode::Always
}

#[derive(Deserialize, Debug, Clone)]
pub struct ExcludeDefinition {
    #[serde(rename = "pfm_target_conditions", default)]
    pub target_conditions: Vec<ConditionDefinition>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ConditionDefinition {
    #[serde(rename = "pfm_target", default)]
    pub target: Option<String>,
    #[serde(rename = "pfm_present", default)]
    pub is_present: Option<bool>,
    #[serde(rename = "pfm_empty", default)]
    pub is_empty: Option<bool>,
    #[serde(rename = "pfm_range_list", default)]
    pub range_list: Option<Vec<Value>>,
    #[serde(rename = "pfm_n_range_list", default)]
    pub not_range_list: Option<Vec<Value>>,
    #[serde(rename = "pfm_contains_any", default)]
    pub contains_any: Option<Vec<Value>>,
    #[serde(rename = "pfm_n_contains_any", default)]
    pub not_contains_any: Option<Vec<Value>>,
    #[serde(rename = "pfm_platforms", default)]
    pub platforms: Option<Platforms>,
    #[serde(rename = "pfm_n_platforms", default)]
    pub not_platforms: Option<Platforms>,
    #[serde(rename = "pfm_distribution", default)]
    pub distribution: Option<Distribution>,
}

// --- MANIFEST ---

/// An in-memory schema built from definitions.
#[derive(Debug, Default)]
pub struct Manifest {
    subkeys: Vec<Subkey>,
    domains: BTreeMap<(PayloadType, String), Domain>,
    index: HashMap<(PayloadType, String, String), SubkeyId>,
    next_condition: u32,
}

impl Manifest {
    /// Builds a manifest from definitions. Definitions without an explicit payload type
    /// are treated as Apple manifests.
    pub fn from_definitions<I>(definitions: I) -> Result<Self, ManifestError>
    where
        I: IntoIterator<Item = ManifestDefinition>,
    {
        let mut manifest = Self::default();
        for definition in definitions {
            manifest.add_definition(definition)?;
        }
        Ok(manifest)
    }

    /// Adds one domain definition to the schema.
    pub fn add_definition(&mut self, definition: ManifestDefinition) -> Result<(), ManifestError> {
        if definition.domain.trim().is_empty() {
            return Err(ManifestError::EmptyDomain);
        }
        let payload_type = definition.payload_type.unwrap_or(PayloadType::ManifestsApple);
        let key = (payload_type, definition.domain.clone());
        if self.domains.contains_key(&key) {
            return Err(ManifestError::DuplicateDomain {
                domain: definition.domain,
                payload_type,
            });
        }

        let scope = DomainScope {
            payload_type,
            domain: &definition.domain,
        };
        let roots = self.add_subkeys(&scope, definition.subkeys, None, "")?;
        log::debug!(
            "Manifest domain '{}' ({}) loaded with {} top-level keys.",
            definition.domain,
            payload_type,
            roots.len()
        );

        self.domains.insert(
            key,
            Domain {
                payload_type,
                identifier: definition.domain.clone(),
                title: definition.title,
                platforms: definition.platforms.unwrap_or(Platforms::ALL),
                scope: definition.scope.unwrap_or(Scope::ALL),
                subkeys: roots,
            },
        );
        Ok(())
    }

    pub fn subkey_count(&self) -> usize {
        self.subkeys.len()
    }

    fn add_subkeys(
        &mut self,
        scope: &DomainScope<'_>,
        definitions: Vec<SubkeyDefinition>,
        parent: Option<SubkeyId>,
        base_path: &str,
    ) -> Result<Vec<SubkeyId>, ManifestError> {
        let parent_is_array = parent
            .and_then(|p| self.subkey(p))
            .is_some_and(Subkey::is_array);

        let mut ids = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let key = definition.name.clone().unwrap_or_default();
            let key_path = if parent_is_array {
                format!("{}[]", base_path)
            } else if definition.segmented_control {
                join_path(base_path, &format!("#{}", key))
            } else {
                join_path(base_path, &key)
            };
            // Segmented controls are transparent: their children live in the parent's container.
            let children_base = if definition.segmented_control {
                base_path.to_string()
            } else {
                key_path.clone()
            };

            let default = match definition.default {
                Some(value) => Some(value.coerce_to(definition.value_type).map_err(|value| {
                    ManifestError::InvalidDefault {
                        domain: scope.domain.to_string(),
                        key_path: key_path.clone(),
                        expected: definition.value_type,
                        value,
                    }
                })?),
                None => None,
            };

            let id = SubkeyId(u32::try_from(self.subkeys.len()).unwrap_or(u32::MAX));
            let conditionals = definition
                .conditionals
                .into_iter()
                .map(|c| Conditional {
                    require: c.require,
                    conditions: self.intern_conditions(c.target_conditions),
                })
                .collect();
            let excludes = definition
                .exclude
                .into_iter()
                .map(|e| self.intern_conditions(e.target_conditions))
                .collect();

            self.subkeys.push(Subkey {
                id,
                payload_type: scope.payload_type,
                domain: scope.domain.to_string(),
                key,
                key_path: key_path.clone(),
                value_type: definition.value_type,
                value_input_type: definition.value_input_type.unwrap_or(definition.value_type),
                default,
                default_enabled: definition.default_enabled,
                require: definition.require,
                conditionals,
                excludes,
                platforms: definition.platforms.unwrap_or(Platforms::ALL),
                scope: definition.scope.unwrap_or(Scope::ALL),
                parent,
                children: Vec::new(),
                range_min: definition.range_min,
                range_max: definition.range_max,
                range_list: definition.range_list,
                format: definition.format,
                value_processor: definition.value_processor,
                value_copy: definition.value_copy,
                segmented_control: definition.segmented_control,
            });

            let index_key = (scope.payload_type, scope.domain.to_string(), key_path.clone());
            if self.index.insert(index_key, id).is_some() {
                return Err(ManifestError::DuplicateKeyPath {
                    domain: scope.domain.to_string(),
                    key_path,
                });
            }

            let children = self.add_subkeys(scope, definition.subkeys, Some(id), &children_base)?;
            if let Some(subkey) = self.subkey_mut(id) {
                subkey.children = children;
            }
            ids.push(id);
        }
        Ok(ids)
    }

    fn intern_conditions(&mut self, definitions: Vec<ConditionDefinition>) -> Vec<Condition> {
        definitions
            .into_iter()
            .map(|d| {
                let id = ConditionId(self.next_condition);
                self.next_condition += 1;
                Condition {
                    id,
                    target: d.target,
                    is_present: d.is_present,
                    is_empty: d.is_empty,
                    range_list: d.range_list,
                    not_range_list: d.not_range_list,
                    contains_any: d.contains_any,
                    not_contains_any: d.not_contains_any,
                    platforms: d.platforms,
                    not_platforms: d.not_platforms,
                    distribution: d.distribution,
                }
            })
            .collect()
    }

    fn subkey_mut(&mut self, id: SubkeyId) -> Option<&mut Subkey> {
        self.subkeys.get_mut(id.0 as usize)
    }
}

struct DomainScope<'a> {
    payload_type: PayloadType,
    domain: &'a str,
}

fn join_path(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", base, key)
    }
}

impl ManifestSource for Manifest {
    fn subkey(&self, id: SubkeyId) -> Option<&Subkey> {
        self.subkeys.get(id.0 as usize)
    }

    fn lookup(&self, payload_type: PayloadType, domain: &str, key_path: &str) -> Option<SubkeyId> {
        self.index
            .get(&(payload_type, domain.to_string(), key_path.to_string()))
            .copied()
    }

    fn domain(&self, payload_type: PayloadType, domain: &str) -> Option<&Domain> {
        self.domains.get(&(payload_type, domain.to_string()))
    }

    fn find_domain(&self, domain: &str) -> Option<&Domain> {
        PayloadType::ALL
            .iter()
            .find_map(|t| self.domains.get(&(*t, domain.to_string())))
    }

    fn domains(&self) -> Vec<&Domain> {
        self.domains.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::fixture_manifest;

    #[test]
    fn test_key_paths_for_nested_arrays_and_segments() {
        let manifest = fixture_manifest();
        let t = PayloadType::ManifestsApple;
        let d = "com.example.vpn";
        assert!(manifest.lookup(t, d, "Servers").is_some());
        assert!(manifest.lookup(t, d, "Servers[]").is_some());
        assert!(manifest.lookup(t, d, "Servers[].Host").is_some());
        // Children of a segmented control are addressed as if it were not there.
        assert!(manifest.lookup(t, d, "Mode").is_some());
        assert!(manifest.lookup(t, d, "Proxy.Port").is_some());
    }

    #[test]
    fn test_parent_child_links() {
        let manifest = fixture_manifest();
        let t = PayloadType::ManifestsApple;
        let servers = manifest.lookup(t, "com.example.vpn", "Servers").unwrap();
        let item = manifest.lookup(t, "com.example.vpn", "Servers[]").unwrap();
        let host = manifest.lookup(t, "com.example.vpn", "Servers[].Host").unwrap();
        assert_eq!(manifest.subkey(servers).unwrap().children, vec![item]);
        assert_eq!(manifest.subkey(host).unwrap().parent, Some(item));
    }

    #[test]
    fn test_invalid_default_is_rejected() {
        let definition: ManifestDefinition = serde_json::from_value(serde_json::json!({
            "pfm_domain": "com.example.bad",
            "pfm_subkeys": [
                { "pfm_name": "Count", "pfm_type": "integer", "pfm_default": "many" }
            ]
        }))
        .unwrap();
        let err = Manifest::from_definitions([definition]).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDefault { .. }));
    }

    #[test]
    fn test_duplicate_domain_is_rejected() {
        let definition = ManifestDefinition {
            domain: "com.example.dup".into(),
            ..Default::default()
        };
        let err = Manifest::from_definitions([definition.clone(), definition]).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateDomain { .. }));
    }
}
