use serde::Serialize;

use crate::ir::Unit;
use crate::rewrite::{RewriteSpec, rewrite_invocations};
use crate::rules::RuleSet;

/// Hook interface for a class loader: a cheap name filter plus an in-place edit.
pub(crate) trait Transformer {
    fn accepts(&self, unit_name: &str) -> bool;
    fn apply(&self, unit: &mut Unit) -> Vec<RewrittenMethod>;
}

/// Methods touched by one [`Transformer::apply`] call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct RewrittenMethod {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) call_sites: usize,
}

/// Rewrites call sites only inside methods selected by a [`RuleSet`].
pub(crate) struct PatternGatedTransform<'a> {
    rules: &'a RuleSet,
    spec: RewriteSpec,
}

impl<'a> PatternGatedTransform<'a> {
    pub(crate) fn new(rules: &'a RuleSet, spec: RewriteSpec) -> Self {
        Self { rules, spec }
    }

    pub(crate) fn spec(&self) -> &RewriteSpec {
        &self.spec
    }
}

impl Transformer for PatternGatedTransform<'_> {
    fn accepts(&self, unit_name: &str) -> bool {
        self.rules.is_eligible(unit_name)
    }

    fn apply(&self, unit: &mut Unit) -> Vec<RewrittenMethod> {
        let eligible = self.rules.eligible_methods(&unit.name);
        if eligible.is_empty() {
            return Vec::new();
        }
        let mut rewritten = Vec::new();
        for method in &mut unit.methods {
            if !eligible.contains(&method.name)
                || !self
                    .rules
                    .accepts_method(&unit.name, &method.name, &method.descriptor)
            {
                continue;
            }
            let call_sites = rewrite_invocations(method, &self.spec);
            if call_sites > 0 {
                log::debug!(
                    "rewrote {} call site(s) in {}.{}{}",
                    call_sites,
                    unit.name,
                    method.name,
                    method.descriptor
                );
                rewritten.push(RewrittenMethod {
                    name: method.name.clone(),
                    descriptor: method.descriptor.clone(),
                    call_sites,
                });
            }
        }
        rewritten
    }
}
