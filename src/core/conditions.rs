//! # Conditional Matcher
//!
//! Evaluates `pfm_conditionals` and `pfm_exclude` condition lists. A list matches when any
//! of its conditions matches, and a condition matches when any of its predicates fires.
//! Matches are reported as records that say which predicate fired on which target, so
//! callers can tell a real match from a bare "target is present" match.

use crate::core::enablement::{EnableQuery, Resolver};
use crate::core::manifest::{Condition, RequireMode, Subkey, SubkeyId};
use crate::core::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    IsPresent,
    IsEmpty,
    RangeList,
    NotRangeList,
    ContainsAny,
    NotContainsAny,
    Platforms,
    NotPlatforms,
    Distribution,
}

/// Why a condition matched.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub kind: MatchKind,
    /// Key path of the inspected key. `None` for platform and distribution predicates.
    pub target_key_path: Option<String>,
    pub value: Option<Value>,
}

impl MatchRecord {
    fn new(kind: MatchKind, target: Option<&Subkey>, value: Option<&Value>) -> Self {
        Self {
            kind,
            target_key_path: target.map(|t| t.key_path.clone()),
            value: value.cloned(),
        }
    }
}

impl<'a> Resolver<'a> {
    /// Matches a condition list on behalf of `id`. Returns `None` when nothing matched.
    /// Bare presence records are dropped unless some condition in the list asks for
    /// `pfm_present` explicitly, so the returned list may be empty.
    pub fn match_conditions(
        &mut self,
        id: SubkeyId,
        conditions: &[Condition],
        payload_index: usize,
        array_index: Option<usize>,
    ) -> Option<Vec<MatchRecord>> {
        let asking = self.subkey(id)?;
        let mut matched = false;
        let mut records = Vec::new();
        for condition in conditions {
            if let Some(found) = self.match_condition(asking, condition, payload_index, array_index) {
                matched = true;
                records.extend(found);
            }
        }
        if !matched {
            return None;
        }
        if !conditions.iter().any(|c| c.is_present.is_some()) {
            records.retain(|r| r.kind != MatchKind::IsPresent);
        }
        Some(records)
    }

    fn match_condition(
        &mut self,
        asking: &'a Subkey,
        condition: &Condition,
        payload_index: usize,
        array_index: Option<usize>,
    ) -> Option<Vec<MatchRecord>> {
        // Cheap predicates first. If any fires the value predicates are not evaluated.
        let context_platforms = self.context.platforms();
        let mut records = Vec::new();
        if condition
            .platforms
            .is_some_and(|p| p.intersects(context_platforms))
        {
            records.push(MatchRecord::new(MatchKind::Platforms, None, None));
        }
        if condition
            .not_platforms
            .is_some_and(|p| !p.intersects(context_platforms))
        {
            records.push(MatchRecord::new(MatchKind::NotPlatforms, None, None));
        }
        if condition
            .distribution
            .is_some_and(|d| d.matches(self.context.distribution()))
        {
            records.push(MatchRecord::new(MatchKind::Distribution, None, None));
        }
        if !records.is_empty() {
            return Some(records);
        }

        let target_path = condition.target.as_deref()?;
        let Some(target) = self.resolve_target(asking, target_path) else {
            log::warn!(
                "Condition on '{}' in '{}' targets unknown key '{}'.",
                asking.key_path,
                asking.domain,
                target_path
            );
            return None;
        };

        let cyclic = self.is_cyclic(asking, target);
        let cache_key = (condition.id, payload_index, array_index);
        if !cyclic && let Some(cached) = self.context.cached_condition(cache_key) {
            return cached;
        }
        if cyclic {
            log::debug!(
                "'{}' and '{}' condition on each other; resolving '{}' without its conditions.",
                asking.key_path,
                target.key_path,
                target.key_path
            );
        }

        let target_enabled = self.is_enabled(
            target.id,
            payload_index,
            EnableQuery {
                array_index,
                only_by_user: false,
                ignore_conditionals: cyclic,
                bypass_cache: cyclic,
            },
        );
        let has_stored = self.stored_value(target, payload_index, array_index).is_some();
        let value = if target_enabled || has_stored {
            self.effective_value(target.id, payload_index, array_index)
        } else {
            None
        };

        let records = evaluate_value_predicates(condition, target, target_enabled, value.as_ref());
        let result = if records.is_empty() { None } else { Some(records) };
        if !cyclic {
            self.context.store_condition(cache_key, result.clone());
        }
        result
    }

    /// Resolves a condition target: first as a key path of the domain, then relative to
    /// the container of the asking key (conditions between siblings of an array element).
    fn resolve_target(&self, asking: &Subkey, target: &str) -> Option<&'a Subkey> {
        let lookup = |path: &str| {
            self.manifest
                .lookup(asking.payload_type, &asking.domain, path)
                .and_then(|id| self.subkey(id))
        };
        lookup(target).or_else(|| {
            let (container, _) = asking.key_path.rsplit_once('.')?;
            lookup(&format!("{}.{}", container, target))
        })
    }

    /// The target conditions on the asking key, or is already being evaluated.
    fn is_cyclic(&self, asking: &Subkey, target: &Subkey) -> bool {
        if self.context.is_evaluating(target.id) {
            return true;
        }
        target.all_conditions().any(|c| {
            c.target
                .as_deref()
                .and_then(|path| self.resolve_target(target, path))
                .is_some_and(|t| t.id == asking.id)
        })
    }

    /// Declared requiredness, push requiredness or a matching conditional.
    pub fn is_required(&mut self, id: SubkeyId, payload_index: usize, array_index: Option<usize>) -> bool {
        let Some(subkey) = self.subkey(id) else {
            return false;
        };
        if self.is_declared_required(subkey) {
            return true;
        }
        let push = self.context.distribution().is_push();
        for conditional in &subkey.conditionals {
            match conditional.require {
                RequireMode::Never => continue,
                RequireMode::Push if !push => continue,
                _ => {}
            }
            let matched =
                self.match_conditions(id, &conditional.conditions, payload_index, array_index);
            if matched.is_some_and(|records| !records.is_empty()) {
                log::trace!("'{}' #{} is conditionally required.", subkey.key_path, payload_index);
                return true;
            }
        }
        false
    }

    /// Whether any exclude list of the subkey matches.
    pub fn is_excluded(&mut self, id: SubkeyId, payload_index: usize, array_index: Option<usize>) -> bool {
        let Some(subkey) = self.subkey(id) else {
            return false;
        };
        subkey.excludes.iter().any(|conditions| {
            self.match_conditions(id, conditions, payload_index, array_index)
                .is_some()
        })
    }
}

/// Evaluates the predicates that inspect the target's state. A condition without such
/// predicates matches, as a bare presence record, whenever the target is enabled.
pub(crate) fn evaluate_value_predicates(
    condition: &Condition,
    target: &Subkey,
    target_enabled: bool,
    value: Option<&Value>,
) -> Vec<MatchRecord> {
    let mut records = Vec::new();
    let mut fire = |kind| records.push(MatchRecord::new(kind, Some(target), value));

    if !condition.has_value_predicate() {
        if target_enabled {
            fire(MatchKind::IsPresent);
        }
        return records;
    }

    if condition.is_present == Some(target_enabled) {
        fire(MatchKind::IsPresent);
    }
    if let Some(expect_empty) = condition.is_empty
        && value.is_none_or(Value::is_empty) == expect_empty
    {
        fire(MatchKind::IsEmpty);
    }

    let elements = elements_of(value);
    let any_in = |list: &[Value]| {
        elements
            .iter()
            .any(|e| list.iter().any(|candidate| e.loosely_equals(candidate)))
    };

    if let Some(list) = &condition.range_list
        && any_in(list)
    {
        fire(MatchKind::RangeList);
    }
    if let Some(list) = &condition.not_range_list
        && !elements.is_empty()
        && !any_in(list)
    {
        fire(MatchKind::NotRangeList);
    }
    if let Some(list) = &condition.contains_any
        && contains_any(value, list)
    {
        fire(MatchKind::ContainsAny);
    }
    if let Some(list) = &condition.not_contains_any
        && value.is_some_and(|v| !v.is_empty())
        && !contains_any(value, list)
    {
        fire(MatchKind::NotContainsAny);
    }
    records
}

/// The scalars to compare: the elements of an array, or the value itself.
fn elements_of(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::List(items)) => items.iter().collect(),
        Some(v) if !v.is_empty() => vec![v],
        _ => Vec::new(),
    }
}

/// Arrays contain an equal element; strings contain a substring; other scalars compare equal.
fn contains_any(value: Option<&Value>, needles: &[Value]) -> bool {
    match value {
        Some(Value::List(items)) => items
            .iter()
            .any(|item| needles.iter().any(|n| item.loosely_equals(n))),
        Some(Value::Str(s)) => needles
            .iter()
            .filter_map(Value::as_str)
            .any(|n| !n.is_empty() && s.contains(n)),
        Some(v) => needles.iter().any(|n| v.loosely_equals(n)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ResolutionContext;
    use crate::core::test_support::{VPN, fixture_manifest, fixture_settings, vpn_key};
    use crate::models::{Distribution, PayloadType};

    const T: PayloadType = PayloadType::ManifestsApple;

    #[test]
    fn test_is_empty_condition_follows_target_value() {
        let manifest = fixture_manifest();
        let mut settings = fixture_settings();
        let mut context = ResolutionContext::default();
        let password = vpn_key(&manifest, "Password");

        assert!(!Resolver::new(&manifest, &settings, &mut context).is_required(password, 0, None));

        settings.set_value("Username", VPN, T, 0, Value::Str("x".into()));
        let mut resolver = Resolver::new(&manifest, &settings, &mut context);
        assert!(resolver.is_required(password, 0, None));
        assert!(resolver.is_enabled(password, 0, EnableQuery::default()));
    }

    #[test]
    fn test_match_records_name_the_predicate() {
        let manifest = fixture_manifest();
        let mut settings = fixture_settings();
        settings.set_value("Username", VPN, T, 0, Value::Str("x".into()));
        let mut context = ResolutionContext::default();
        let mut resolver = Resolver::new(&manifest, &settings, &mut context);

        let password = vpn_key(&manifest, "Password");
        let conditions = &manifest_subkey(&resolver, password).conditionals[0].conditions;
        let records = resolver.match_conditions(password, conditions, 0, None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, MatchKind::IsEmpty);
        assert_eq!(records[0].target_key_path.as_deref(), Some("Username"));
        assert_eq!(records[0].value, Some(Value::Str("x".into())));
    }

    fn manifest_subkey<'a>(resolver: &Resolver<'a>, id: SubkeyId) -> &'a Subkey {
        resolver.subkey(id).unwrap()
    }

    #[test]
    fn test_mutual_conditions_terminate() {
        let manifest = fixture_manifest();
        let mut settings = fixture_settings();
        settings.set_view_enabled("CycleB", VPN, T, 0, true);
        let mut context = ResolutionContext::default();
        let mut resolver = Resolver::new(&manifest, &settings, &mut context);

        // CycleB is present, so CycleA is required; CycleA then makes CycleB required too.
        assert!(resolver.is_enabled(vpn_key(&manifest, "CycleA"), 0, EnableQuery::default()));
        assert!(resolver.is_enabled(vpn_key(&manifest, "CycleB"), 0, EnableQuery::default()));
    }

    #[test]
    fn test_exclude_on_array_of_scalars() {
        let manifest = fixture_manifest();
        let mut settings = fixture_settings();
        settings.set_view_enabled("Tags", VPN, T, 0, true);
        settings.set_value(
            "Tags",
            VPN,
            T,
            0,
            Value::List(vec![Value::Str("a".into()), Value::Str("legacy-off".into())]),
        );
        let mut context = ResolutionContext::default();
        let mut resolver = Resolver::new(&manifest, &settings, &mut context);
        assert!(resolver.is_excluded(vpn_key(&manifest, "Legacy"), 0, None));
    }

    #[test]
    fn test_distribution_predicate_short_circuits() {
        let manifest = fixture_manifest();
        let settings = fixture_settings();
        let mut context = ResolutionContext::new(Distribution::Push, Default::default(), Default::default());
        let mut resolver = Resolver::new(&manifest, &settings, &mut context);

        let name = vpn_key(&manifest, "Name");
        let condition = Condition {
            id: Default::default(),
            target: Some("DoesNotExist".into()),
            is_present: None,
            is_empty: None,
            range_list: None,
            not_range_list: None,
            contains_any: None,
            not_contains_any: None,
            platforms: None,
            not_platforms: None,
            distribution: Some(Distribution::Push),
        };
        let records = resolver.match_conditions(name, &[condition], 0, None).unwrap();
        assert_eq!(records[0].kind, MatchKind::Distribution);
    }

    #[test]
    fn test_value_predicates() {
        let manifest = fixture_manifest();
        let target = manifest_subkey_of(&manifest, "Mode");
        let mut condition = Condition {
            id: Default::default(),
            target: Some("Mode".into()),
            is_present: None,
            is_empty: None,
            range_list: Some(vec![Value::Str("L2TP".into())]),
            not_range_list: None,
            contains_any: None,
            not_contains_any: None,
            platforms: None,
            not_platforms: None,
            distribution: None,
        };
        let l2tp = Value::Str("L2TP".into());
        let ike = Value::Str("IKEv2".into());
        assert_eq!(evaluate_value_predicates(&condition, target, true, Some(&l2tp)).len(), 1);
        assert!(evaluate_value_predicates(&condition, target, true, Some(&ike)).is_empty());

        condition.range_list = None;
        condition.not_range_list = Some(vec![l2tp.clone()]);
        assert_eq!(
            evaluate_value_predicates(&condition, target, true, Some(&ike))[0].kind,
            MatchKind::NotRangeList
        );
        // Absent values never satisfy a negative list.
        assert!(evaluate_value_predicates(&condition, target, false, None).is_empty());

        condition.not_range_list = None;
        assert_eq!(
            evaluate_value_predicates(&condition, target, true, None)[0].kind,
            MatchKind::IsPresent
        );
    }

    fn manifest_subkey_of<'m>(manifest: &'m crate::core::manifest::Manifest, path: &str) -> &'m Subkey {
        use crate::core::manifest::ManifestSource;
        manifest.subkey(vpn_key(manifest, path)).unwrap()
    }
}
