//! Auto-approve policy.
//!
//! A plan the planner classified `auto` only skips human approval when every
//! step is allowed by some rule and denied by none. Deny wins.

use vigil_core::config::AutoApproveRule;
use vigil_core::types::PlanStep;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, Default)]
pub struct AutoApprovePolicy {
    rules: Vec<AutoApproveRule>,
}

impl AutoApprovePolicy {
    pub fn new(rules: Vec<AutoApproveRule>) -> Self {
        Self { rules }
    }

    fn matching<'a>(&'a self, step: &'a PlanStep) -> impl Iterator<Item = &'a AutoApproveRule> + 'a {
        self.rules.iter().filter(move |r| {
            (r.adapter == WILDCARD || r.adapter == step.adapter)
                && (r.operation == WILDCARD || r.operation == step.operation)
        })
    }

    /// Whether a single step may run without approval.
    pub fn permits(&self, step: &PlanStep) -> bool {
        let mut allowed = false;
        for rule in self.matching(step) {
            if !rule.allow {
                return false;
            }
            allowed = true;
        }
        allowed
    }

    /// Whether every step of a plan may run without approval.
    pub fn permits_all(&self, steps: &[PlanStep]) -> bool {
        !steps.is_empty() && steps.iter().all(|s| self.permits(s))
    }
}
