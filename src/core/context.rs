// src/core/context.rs

use crate::core::conditions::MatchRecord;
use crate::core::events::{EventChannel, SettingsEvent};
use crate::core::manifest::{ConditionId, SubkeyId};
use crate::core::value::Value;
use crate::models::{Distribution, Platforms, Scope};
use std::collections::HashMap;
use std::sync::mpsc::Receiver;

type EnabledKey = (SubkeyId, usize, Option<usize>);
type ConditionKey = (ConditionId, usize, Option<usize>);

/// Hit/miss counters of the resolution memos since the context was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub resets: u64,
}

/// The dimensions a profile is resolved for, plus the memos valid for them.
///
/// Every memo is only meaningful for one (distribution, platforms, scope, optional-keys)
/// tuple and one settings revision. Changing any of them drops all memos before the
/// corresponding event is emitted.
#[derive(Debug)]
pub struct ResolutionContext {
    distribution: Distribution,
    platforms: Platforms,
    scope: Scope,
    disable_optional_keys: bool,

    enabled: HashMap<EnabledKey, bool>,
    conditionals: HashMap<ConditionKey, Option<Vec<MatchRecord>>>,
    payload_content: HashMap<EnabledKey, Option<Value>>,

    /// Subkeys whose enablement is currently being computed, innermost last.
    stack: Vec<SubkeyId>,
    seen_revision: Option<u64>,
    stats: CacheStats,
    events: EventChannel,
}

impl Default for ResolutionContext {
    fn default() -> Self {
        Self::new(Distribution::default(), Platforms::default(), Scope::default())
    }
}

impl ResolutionContext {
    pub fn new(distribution: Distribution, platforms: Platforms, scope: Scope) -> Self {
        Self {
            distribution,
            platforms,
            scope,
            disable_optional_keys: true,
            enabled: HashMap::new(),
            conditionals: HashMap::new(),
            payload_content: HashMap::new(),
            stack: Vec::new(),
            seen_revision: None,
            stats: CacheStats::default(),
            events: EventChannel::default(),
        }
    }

    pub fn distribution(&self) -> Distribution {
        self.distribution
    }

    pub fn platforms(&self) -> Platforms {
        self.platforms
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// When set, keys without any reason to be enabled start out disabled.
    pub fn disable_optional_keys(&self) -> bool {
        self.disable_optional_keys
    }

    pub fn subscribe(&mut self) -> Receiver<SettingsEvent> {
        self.events.subscribe()
    }

    pub fn set_distribution(&mut self, distribution: Distribution) {
        if self.distribution == distribution {
            return;
        }
        self.distribution = distribution;
        self.reset_cache();
        self.events.emit(SettingsEvent::DistributionChanged(distribution));
    }

    pub fn set_platforms(&mut self, platforms: Platforms) {
        if self.platforms == platforms {
            return;
        }
        self.platforms = platforms;
        self.reset_cache();
        self.events.emit(SettingsEvent::PlatformsChanged(platforms));
    }

    pub fn set_scope(&mut self, scope: Scope) {
        if self.scope == scope {
            return;
        }
        self.scope = scope;
        self.reset_cache();
        self.events.emit(SettingsEvent::ScopeChanged(scope));
    }

    pub fn set_disable_optional_keys(&mut self, disable: bool) {
        if self.disable_optional_keys != disable {
            self.disable_optional_keys = disable;
            self.reset_cache();
        }
    }

    /// Drops every memo.
    pub fn reset_cache(&mut self) {
        log::debug!(
            "Resetting resolution caches ({} enabled, {} conditional, {} content entries).",
            self.enabled.len(),
            self.conditionals.len(),
            self.payload_content.len()
        );
        self.enabled.clear();
        self.conditionals.clear();
        self.payload_content.clear();
        self.stats.resets += 1;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.stats
    }

    /// Drops the memos if the settings changed since they were computed.
    pub(crate) fn observe_revision(&mut self, revision: u64) {
        if self.seen_revision != Some(revision) {
            if self.seen_revision.is_some() {
                self.reset_cache();
            }
            self.seen_revision = Some(revision);
        }
    }

    // --- Memo access ---

    pub(crate) fn cached_enabled(&mut self, key: EnabledKey) -> Option<bool> {
        let found = self.enabled.get(&key).copied();
        self.count(found.is_some());
        found
    }

    pub(crate) fn store_enabled(&mut self, key: EnabledKey, enabled: bool) {
        self.enabled.insert(key, enabled);
    }

    pub(crate) fn cached_condition(&mut self, key: ConditionKey) -> Option<Option<Vec<MatchRecord>>> {
        let found = self.conditionals.get(&key).cloned();
        self.count(found.is_some());
        found
    }

    pub(crate) fn store_condition(&mut self, key: ConditionKey, records: Option<Vec<MatchRecord>>) {
        self.conditionals.insert(key, records);
    }

    pub(crate) fn cached_content(&mut self, key: EnabledKey) -> Option<Option<Value>> {
        let found = self.payload_content.get(&key).cloned();
        self.count(found.is_some());
        found
    }

    pub(crate) fn store_content(&mut self, key: EnabledKey, value: Option<Value>) {
        self.payload_content.insert(key, value);
    }

    fn count(&mut self, hit: bool) {
        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
    }

    // --- Evaluation stack ---

    pub(crate) fn is_evaluating(&self, id: SubkeyId) -> bool {
        self.stack.contains(&id)
    }

    pub(crate) fn push(&mut self, id: SubkeyId) {
        self.stack.push(id);
    }

    pub(crate) fn pop(&mut self) {
        self.stack.pop();
    }
}
