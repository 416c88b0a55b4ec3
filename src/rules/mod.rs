use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::PatternError;

pub(crate) mod pattern;

pub(crate) use pattern::{MethodPattern, Tier};

/// Layered rule lists resolved into per-unit eligible method names.
///
/// A key `unit#method#descriptor` is eligible when it matches a default or
/// additional pattern and no blacklist pattern. Resolution per unit name is
/// lazy and memoized; a built set is safe to query from several threads.
#[derive(Debug, Default)]
pub(crate) struct RuleSet {
    selectors: Vec<MethodPattern>,
    blacklist: Vec<MethodPattern>,
    resolved: DashMap<String, Arc<BTreeSet<String>>>,
}

impl RuleSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Compile rule strings into `tier`.
    ///
    /// Strings that fail to compile are returned and logged; the rest are kept.
    pub(crate) fn add_patterns<S: AsRef<str>>(
        &mut self,
        tier: Tier,
        patterns: &[S],
    ) -> Vec<PatternError> {
        let target = match tier {
            Tier::Default | Tier::Additional => &mut self.selectors,
            Tier::Blacklist => &mut self.blacklist,
        };
        let errors = compile_into(tier, patterns, target);
        self.resolved.clear();
        errors
    }

    pub(crate) fn add_blacklist<S: AsRef<str>>(&mut self, patterns: &[S]) -> Vec<PatternError> {
        self.add_patterns(Tier::Blacklist, patterns)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub(crate) fn is_eligible(&self, unit: &str) -> bool {
        !self.eligible_methods(unit).is_empty()
    }

    /// Names of methods in `unit` selected by at least one surviving rule.
    ///
    /// A blacklist rule only removes a name here when it names the same method
    /// with no descriptor or the same descriptor text, so the set may be wider
    /// than what [`RuleSet::accepts_method`] allows. It is a pre-filter.
    pub(crate) fn eligible_methods(&self, unit: &str) -> Arc<BTreeSet<String>> {
        if let Some(cached) = self.resolved.get(unit) {
            return Arc::clone(cached.value());
        }
        let resolved = Arc::new(self.resolve(unit));
        self.resolved
            .entry(unit.to_string())
            .or_insert(resolved)
            .value()
            .clone()
    }

    /// Exact eligibility of one composite key.
    pub(crate) fn accepts_method(&self, unit: &str, method: &str, descriptor: &str) -> bool {
        self.selectors
            .iter()
            .any(|pattern| pattern.matches(unit, method, descriptor))
            && !self
                .blacklist
                .iter()
                .any(|pattern| pattern.matches(unit, method, descriptor))
    }

    fn resolve(&self, unit: &str) -> BTreeSet<String> {
        let blacklist: Vec<&MethodPattern> = self
            .blacklist
            .iter()
            .filter(|pattern| pattern.matches_unit(unit))
            .collect();
        self.selectors
            .iter()
            .filter(|pattern| pattern.matches_unit(unit))
            .filter(|pattern| !blacklist.iter().any(|banned| banned.covers(pattern)))
            .map(|pattern| pattern.method().to_string())
            .collect()
    }
}

fn compile_into<S: AsRef<str>>(
    tier: Tier,
    patterns: &[S],
    target: &mut Vec<MethodPattern>,
) -> Vec<PatternError> {
    let mut errors = Vec::new();
    for source in patterns {
        match MethodPattern::compile(tier, source.as_ref()) {
            Ok(pattern) => {
                log::debug!("compiled {:?} pattern {}", pattern.tier, pattern.source());
                target.push(pattern);
            }
            Err(err) => {
                log::warn!("skipping rule: {err}");
                errors.push(err);
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(default: &[&str], additional: &[&str], blacklist: &[&str]) -> RuleSet {
        let mut rules = RuleSet::new();
        assert!(rules.add_patterns(Tier::Default, default).is_empty());
        assert!(rules.add_patterns(Tier::Additional, additional).is_empty());
        assert!(rules.add_blacklist(blacklist).is_empty());
        rules
    }

    #[test]
    fn default_pattern_selects_method() {
        let rules = rules(&[r"Foo#bar#\(\)V"], &[], &[]);

        assert!(rules.is_eligible("Foo"));
        let methods = rules.eligible_methods("Foo");
        assert_eq!(methods.iter().cloned().collect::<Vec<_>>(), vec!["bar".to_string()]);
        assert!(!rules.is_eligible("Bar"));
    }

    #[test]
    fn blacklist_wins_over_default() {
        let rules = rules(&[r"Foo#bar#\(\)V"], &[], &[r"Foo#bar#\(\)V"]);

        assert!(!rules.is_eligible("Foo"));
        assert!(!rules.accepts_method("Foo", "bar", "()V"));
    }

    #[test]
    fn blacklist_wins_regardless_of_insertion_order() {
        let mut rules = RuleSet::new();
        rules.add_blacklist(&[r"Foo#bar#\(\)V"]);
        rules.add_patterns(Tier::Additional, &[r"Foo#bar#\(\)V"]);

        assert!(!rules.is_eligible("Foo"));
        assert!(!rules.accepts_method("Foo", "bar", "()V"));
    }

    #[test]
    fn additional_patterns_extend_defaults() {
        let rules = rules(&["Foo#bar"], &["Foo#baz", "Other#qux"], &[]);

        let methods = rules.eligible_methods("Foo");
        assert!(methods.contains("bar"));
        assert!(methods.contains("baz"));
        assert!(!methods.contains("qux"));
    }

    #[test]
    fn descriptor_specific_blacklist_only_removes_matching_keys() {
        let rules = rules(&["Foo#bar"], &[], &[r"Foo#bar#\(I\)V"]);

        assert!(rules.eligible_methods("Foo").contains("bar"));
        assert!(rules.accepts_method("Foo", "bar", "()V"));
        assert!(!rules.accepts_method("Foo", "bar", "(I)V"));
    }

    #[test]
    fn blacklist_tier_passed_to_add_patterns_is_a_blacklist() {
        let mut rules = RuleSet::new();
        rules.add_patterns(Tier::Default, &["Foo#bar"]);
        rules.add_patterns(Tier::Blacklist, &["Foo#bar"]);

        assert!(!rules.is_eligible("Foo"));
        assert!(!rules.accepts_method("Foo", "bar", "()V"));
    }

    #[test]
    fn differently_written_descriptor_blacklist_only_filters_exact_keys() {
        let rules = rules(&[r"Foo#bar#\(\)V"], &[], &[r"Foo#bar#\(\)."]);

        assert!(rules.is_eligible("Foo"));
        assert!(rules.eligible_methods("Foo").contains("bar"));
        assert!(!rules.accepts_method("Foo", "bar", "()V"));
    }

    fn matches_any(sources: &[&str], (unit, method, desc): (&str, &str, &str)) -> bool {
        sources.iter().any(|source| {
            MethodPattern::compile(Tier::Default, source)
                .expect("compile")
                .matches(unit, method, desc)
        })
    }

    #[test]
    fn eligibility_follows_formula_on_composite_keys() {
        let rules = rules(
            &[r"a/.*#run#\(\)V", "b/B#run"],
            &["c/C#go"],
            &["a/Skip#run", r"b/B#run#\(I\)V"],
        );
        let keys = [
            ("a/A", "run", "()V"),
            ("a/Skip", "run", "()V"),
            ("a/A", "run", "(I)V"),
            ("b/B", "run", "()V"),
            ("b/B", "run", "(I)V"),
            ("c/C", "go", "()V"),
            ("c/C", "run", "()V"),
        ];
        let default = [r"a/.*#run#\(\)V", "b/B#run"];
        let additional = ["c/C#go"];
        let blacklist = ["a/Skip#run", r"b/B#run#\(I\)V"];
        for key in keys {
            let expected = (matches_any(&default, key) || matches_any(&additional, key))
                && !matches_any(&blacklist, key);
            assert_eq!(rules.accepts_method(key.0, key.1, key.2), expected, "{key:?}");
        }
    }

    #[test]
    fn invalid_patterns_are_reported_and_dropped() {
        let mut rules = RuleSet::new();
        let errors = rules.add_patterns(Tier::Default, &["Foo#bar", "Broken(#x", "NoMethod"]);

        assert_eq!(errors.len(), 2);
        assert!(rules.is_eligible("Foo"));
        assert!(!rules.is_eligible("Broken"));
    }

    #[test]
    fn resolution_is_memoized_and_reset_by_new_patterns() {
        let mut rules = rules(&["Foo#bar"], &[], &[]);

        let first = rules.eligible_methods("Foo");
        let second = rules.eligible_methods("Foo");
        assert!(Arc::ptr_eq(&first, &second));

        rules.add_blacklist(&["Foo#bar"]);
        assert!(!rules.is_eligible("Foo"));
    }

    #[test]
    fn empty_rule_set_accepts_nothing() {
        let rules = RuleSet::new();

        assert!(rules.is_empty());
        assert!(!rules.is_eligible("Foo"));
    }
}
