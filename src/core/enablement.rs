//! # Enablement Resolver
//!
//! Decides whether a subkey takes part in a payload instance. The checks run in a fixed
//! order and the first one that decides wins:
//!
//! 1. a memoized result for (subkey, instance, array index);
//! 2. declared requiredness (`always`, `always-nested`, `push` under push distribution)
//!    while every ancestor is enabled;
//! 3. element templates of a multi-element array follow their array;
//! 4. the starting point is `!disable_optional_keys`;
//! 5. conditional requiredness while every ancestor is enabled;
//! 6. the user's explicit flag, then the manifest's default-enabled flag, then dynamic
//!    dictionary placeholders, then children of array elements (enabled when the element
//!    holds a value);
//! 7. a container the user did not switch off is enabled when any descendant was
//!    enabled by the user;
//! 8. the canonical answer is memoized.
//!
//! Resolution never fails: unknown subkeys are simply disabled.

use crate::core::context::ResolutionContext;
use crate::core::manifest::{ManifestSource, RequireMode, Subkey, SubkeyId};
use crate::core::settings::ProfileSettings;
use crate::core::value::Value;
use std::fmt;

/// Options of a single `is_enabled` query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnableQuery {
    /// Element of the enclosing array. `None` asks about the key in general.
    pub array_index: Option<usize>,
    /// Only report what the user explicitly enabled (no defaults, no requiredness).
    pub only_by_user: bool,
    /// Skip conditional requiredness. Used to break mutually dependent conditions.
    pub ignore_conditionals: bool,
    /// Recompute even when a memoized answer exists.
    pub bypass_cache: bool,
}

impl EnableQuery {
    pub fn at(array_index: Option<usize>) -> Self {
        Self {
            array_index,
            ..Self::default()
        }
    }

    fn is_canonical(&self) -> bool {
        !self.only_by_user && !self.ignore_conditionals
    }
}

/// Answers enablement, requiredness and exclusion questions for one profile.
pub struct Resolver<'a> {
    pub(crate) manifest: &'a dyn ManifestSource,
    pub(crate) settings: &'a ProfileSettings,
    pub(crate) context: &'a mut ResolutionContext,
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<'a> Resolver<'a> {
    pub fn new(
        manifest: &'a dyn ManifestSource,
        settings: &'a ProfileSettings,
        context: &'a mut ResolutionContext,
    ) -> Self {
        context.observe_revision(settings.revision());
        Self {
            manifest,
            settings,
            context,
        }
    }

    pub fn context(&self) -> &ResolutionContext {
        self.context
    }

    pub(crate) fn subkey(&self, id: SubkeyId) -> Option<&'a Subkey> {
        let manifest: &'a dyn ManifestSource = self.manifest;
        manifest.subkey(id)
    }

    pub fn is_enabled(&mut self, id: SubkeyId, payload_index: usize, query: EnableQuery) -> bool {
        let Some(subkey) = self.subkey(id) else {
            return false;
        };
        let mut query = query;
        let key = (id, payload_index, query.array_index);

        if query.is_canonical()
            && !query.bypass_cache
            && let Some(enabled) = self.context.cached_enabled(key)
        {
            return enabled;
        }

        // A key asking about itself through its own conditions: answer without them.
        if !query.only_by_user && self.context.is_evaluating(id) {
            log::trace!("Re-entrant enablement query for '{}', ignoring conditionals.", subkey.key_path);
            query.ignore_conditionals = true;
            query.bypass_cache = true;
        }

        self.context.push(id);
        let enabled = self.resolve_enabled(subkey, payload_index, query);
        self.context.pop();
        enabled
    }

    fn resolve_enabled(&mut self, subkey: &'a Subkey, payload_index: usize, query: EnableQuery) -> bool {
        let key = (subkey.id, payload_index, query.array_index);
        let parents_enabled = query.only_by_user || self.parents_enabled(subkey, payload_index, query);

        // Only-by-user queries skip declared requiredness.
        if !query.only_by_user && parents_enabled {
            if self.is_declared_required(subkey) {
                self.context.store_enabled(key, true);
                return true;
            }
            if self
                .effective_parent(subkey)
                .is_some_and(|p| subkey.parent == Some(p.id) && p.is_array() && !p.is_single_element_array())
            {
                self.context.store_enabled(key, true);
                return true;
            }
        }

        let mut enabled = !query.only_by_user && !self.context.disable_optional_keys();

        if query.is_canonical()
            && parents_enabled
            && self.is_required(subkey.id, payload_index, query.array_index)
        {
            self.context.store_enabled(key, true);
            return true;
        }

        let user_flag = self.settings.view_enabled(
            &subkey.key_path,
            &subkey.domain,
            subkey.payload_type,
            payload_index,
        );
        if let Some(flag) = user_flag {
            enabled = flag;
        } else if !query.only_by_user && parents_enabled && subkey.default_enabled.is_some() {
            enabled = subkey.default_enabled.unwrap_or(enabled);
        } else if !query.only_by_user && subkey.is_dynamic_placeholder() {
            self.context.store_enabled(key, true);
            return true;
        } else if !query.only_by_user && self.is_array_element_child(subkey) {
            enabled = match query.array_index {
                Some(index) => self
                    .settings
                    .value_at(
                        &subkey.key_path,
                        &subkey.domain,
                        subkey.payload_type,
                        payload_index,
                        Some(index),
                    )
                    .is_some(),
                None => true,
            };
        }

        // An explicit "off" on the key itself is not overridden by its children.
        if !enabled && user_flag.is_none() && !(subkey.is_array() && !subkey.is_single_element_array()) {
            enabled = self.any_child_enabled_by_user(subkey, payload_index, query.array_index);
        }

        let result = if query.only_by_user {
            enabled
        } else {
            enabled && parents_enabled
        };
        if query.is_canonical() {
            self.context.store_enabled(key, result);
        }
        log::trace!(
            "'{}' #{} [{:?}] enabled = {}",
            subkey.key_path,
            payload_index,
            query.array_index,
            result
        );
        result
    }

    /// `always`/`always-nested`, or `push` while distributing over MDM.
    pub(crate) fn is_declared_required(&self, subkey: &Subkey) -> bool {
        match subkey.require {
            RequireMode::Always | RequireMode::AlwaysNested => true,
            RequireMode::Push => self.context.distribution().is_push(),
            RequireMode::Never => false,
        }
    }

    /// The closest ancestor that gates this subkey. Segmented controls and the dictionary
    /// element of a single-element array are transparent.
    pub(crate) fn effective_parent(&self, subkey: &Subkey) -> Option<&'a Subkey> {
        let mut current = self.subkey(subkey.parent?)?;
        loop {
            let transparent = current.segmented_control
                || (current.is_dictionary()
                    && current
                        .parent
                        .and_then(|p| self.subkey(p))
                        .is_some_and(Subkey::is_single_element_array));
            if !transparent {
                return Some(current);
            }
            current = self.subkey(current.parent?)?;
        }
    }

    fn parents_enabled(&mut self, subkey: &Subkey, payload_index: usize, query: EnableQuery) -> bool {
        match self.effective_parent(subkey) {
            None => true,
            Some(parent) => self.is_enabled(
                parent.id,
                payload_index,
                EnableQuery {
                    array_index: query.array_index,
                    only_by_user: false,
                    ignore_conditionals: query.ignore_conditionals,
                    bypass_cache: false,
                },
            ),
        }
    }

    /// A child of the dictionary element of a multi-element array.
    fn is_array_element_child(&self, subkey: &Subkey) -> bool {
        let Some(element) = subkey.parent.and_then(|p| self.subkey(p)) else {
            return false;
        };
        element.is_dictionary()
            && element
                .parent
                .and_then(|p| self.subkey(p))
                .is_some_and(|array| array.is_array() && !array.is_single_element_array())
    }

    fn any_child_enabled_by_user(
        &mut self,
        subkey: &Subkey,
        payload_index: usize,
        array_index: Option<usize>,
    ) -> bool {
        let query = EnableQuery {
            array_index,
            only_by_user: true,
            ignore_conditionals: true,
            bypass_cache: true,
        };
        subkey
            .children
            .iter()
            .any(|child| self.is_enabled(*child, payload_index, query))
    }

    /// Whether the subkey applies to the selected platforms and scope.
    pub fn is_available(&self, id: SubkeyId) -> bool {
        self.subkey(id).is_some_and(|s| {
            s.platforms.intersects(self.context.platforms()) && s.scope.intersects(self.context.scope())
        })
    }

    /// The value a key resolves to: the stored value, else the value of the key it copies
    /// from, else its manifest default. Empty stored values fall through.
    pub fn effective_value(
        &mut self,
        id: SubkeyId,
        payload_index: usize,
        array_index: Option<usize>,
    ) -> Option<Value> {
        let subkey = self.subkey(id)?;
        let key = (id, payload_index, array_index);
        if let Some(cached) = self.context.cached_content(key) {
            return cached;
        }

        let stored = self.stored_value(subkey, payload_index, array_index);
        let value = match stored {
            Some(v) if !v.is_empty() => Some(v.clone()),
            _ => self
                .copied_value(subkey, payload_index, array_index)
                .or_else(|| subkey.default.clone())
                .or_else(|| stored.cloned()),
        };
        self.context.store_content(key, value.clone());
        value
    }

    pub(crate) fn stored_value(
        &self,
        subkey: &Subkey,
        payload_index: usize,
        array_index: Option<usize>,
    ) -> Option<&'a Value> {
        let settings: &'a ProfileSettings = self.settings;
        settings.value_at(
            &subkey.key_path,
            &subkey.domain,
            subkey.payload_type,
            payload_index,
            array_index,
        )
    }

    fn copied_value(
        &self,
        subkey: &Subkey,
        payload_index: usize,
        array_index: Option<usize>,
    ) -> Option<Value> {
        let source_path = subkey.value_copy.as_deref()?;
        let source = self
            .manifest
            .lookup(subkey.payload_type, &subkey.domain, source_path)
            .and_then(|id| self.subkey(id));
        match source {
            Some(source) => self
                .stored_value(source, payload_index, array_index)
                .filter(|v| !v.is_empty())
                .cloned()
                .or_else(|| source.default.clone()),
            None => {
                log::warn!(
                    "'{}' copies its value from unknown key '{}' in '{}'.",
                    subkey.key_path,
                    source_path,
                    subkey.domain
                );
                None
            }
        }
    }
}
