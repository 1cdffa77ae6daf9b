//! Verification engine for reallocation plans
//!
//! Rules-based checks run on every plan before it reaches the report.
//! Deterministic enforcement.

use crate::models::{Deviation, PlanCheck, PlanVerification, ReallocationPlan, MONEY_EPSILON};
use tracing::{info, warn};

/// Trait for plan rules
pub trait PlanRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify(&self, plan: &ReallocationPlan, deviations: &[Deviation]) -> RuleOutcome;
}

pub struct RuleOutcome {
    pub passed: bool,
    pub details: String,
}

/// Verification engine that enforces rules
pub struct PlanVerifier {
    rules: Vec<Box<dyn PlanRule>>,
}

impl PlanVerifier {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn PlanRule>) {
        self.rules.push(rule);
    }

    pub fn verify(&self, plan: &ReallocationPlan, deviations: &[Deviation]) -> PlanVerification {
        let mut checks = Vec::with_capacity(self.rules.len());
        let mut issues = Vec::new();

        for rule in &self.rules {
            let outcome = rule.verify(plan, deviations);

            if !outcome.passed {
                warn!(rule = rule.name(), details = %outcome.details, "Plan rule failed");
                issues.push(format!("{}: {}", rule.name(), outcome.details));
            }

            checks.push(PlanCheck {
                rule_name: rule.name().to_string(),
                passed: outcome.passed,
                details: outcome.details,
            });
        }

        let verified = issues.is_empty();

        info!(
            rule_count = self.rules.len(),
            verified = verified,
            "Plan verification completed"
        );

        PlanVerification {
            verified,
            checks,
            issues,
        }
    }
}

impl Default for PlanVerifier {
    fn default() -> Self {
        Self::new()
    }
}

//
// ========== Plan Rules ==========
//

/// Rule: no donor ends below break-even
pub struct DonorBalanceRule;

impl PlanRule for DonorBalanceRule {
    fn name(&self) -> &'static str {
        "donor_balance_non_negative"
    }

    fn verify(&self, plan: &ReallocationPlan, deviations: &[Deviation]) -> RuleOutcome {
        let overdrawn: Vec<String> = deviations
            .iter()
            .filter_map(|d| {
                let outgoing = plan.outgoing(&d.category);
                let balance = d.budgeted_amount - d.actual_amount - outgoing;
                (outgoing > 0.0 && balance < -MONEY_EPSILON)
                    .then(|| format!("{} ({:.2})", d.category, balance))
            })
            .collect();

        RuleOutcome {
            passed: overdrawn.is_empty(),
            details: if overdrawn.is_empty() {
                format!("{} transfers keep every donor solvent", plan.transfers.len())
            } else {
                format!("overdrawn donors: {}", overdrawn.join(", "))
            },
        }
    }
}

/// Rule: essential donors only after all discretionary surplus is used
pub struct EssentialLastRule;

impl PlanRule for EssentialLastRule {
    fn name(&self) -> &'static str {
        "essential_donors_last"
    }

    fn verify(&self, plan: &ReallocationPlan, deviations: &[Deviation]) -> RuleOutcome {
        let draws_essential = plan.transfers.iter().any(|t| {
            deviations
                .iter()
                .any(|d| d.category == t.from_category && d.essential)
        });

        if !draws_essential {
            return RuleOutcome {
                passed: true,
                details: "no essential donors used".to_string(),
            };
        }

        let leftover: Vec<String> = deviations
            .iter()
            .filter(|d| !d.essential && !d.is_over_budget())
            .filter(|d| d.surplus() - plan.outgoing(&d.category) > MONEY_EPSILON)
            .map(|d| d.category.clone())
            .collect();

        RuleOutcome {
            passed: leftover.is_empty(),
            details: if leftover.is_empty() {
                "discretionary surplus exhausted before essential draws".to_string()
            } else {
                format!("discretionary surplus left in: {}", leftover.join(", "))
            },
        }
    }
}

/// Rule: every overage is either covered or reported as a shortfall
pub struct CoverageRule;

impl PlanRule for CoverageRule {
    fn name(&self) -> &'static str {
        "overage_accounted_for"
    }

    fn verify(&self, plan: &ReallocationPlan, deviations: &[Deviation]) -> RuleOutcome {
        let unaccounted: Vec<String> = deviations
            .iter()
            .filter(|d| d.is_over_budget())
            .filter_map(|d| {
                let incoming: f64 = plan
                    .transfers
                    .iter()
                    .filter(|t| t.to_category == d.category)
                    .map(|t| t.amount)
                    .sum();
                let reported: f64 = plan
                    .shortfalls
                    .iter()
                    .filter(|s| s.category == d.category)
                    .map(|s| s.amount)
                    .sum();
                ((incoming + reported - d.overage()).abs() > MONEY_EPSILON)
                    .then(|| d.category.clone())
            })
            .collect();

        RuleOutcome {
            passed: unaccounted.is_empty(),
            details: if unaccounted.is_empty() {
                format!(
                    "covered {:.2}, shortfall {:.2}",
                    plan.total_transferred(),
                    plan.total_shortfall()
                )
            } else {
                format!("unaccounted overage in: {}", unaccounted.join(", "))
            },
        }
    }
}

/// Create a verifier with the standard plan rules
pub fn create_default_verifier() -> PlanVerifier {
    let mut verifier = PlanVerifier::new();
    verifier.add_rule(Box::new(DonorBalanceRule));
    verifier.add_rule(Box::new(EssentialLastRule));
    verifier.add_rule(Box::new(CoverageRule));
    verifier
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::demo_profile;
    use crate::models::{Shortfall, Transfer};
    use crate::reallocation::ReallocationPlanner;

    fn dev(category: &str, budgeted: f64, actual: f64, essential: bool) -> Deviation {
        Deviation {
            category: category.to_string(),
            budgeted_amount: budgeted,
            actual_amount: actual,
            severity: crate::detector::severity(budgeted, actual),
            essential,
        }
    }

    fn deviations() -> Vec<Deviation> {
        vec![
            dev("Food", 400.0, 550.0, true),
            dev("Entertainment", 100.0, 40.0, false),
            dev("Savings", 300.0, 300.0, true),
            dev("Housing", 1200.0, 1200.0, true),
            dev("Transport", 200.0, 150.0, false),
            dev("Other", 150.0, 100.0, false),
        ]
    }

    fn transfer(from: &str, to: &str, amount: f64) -> Transfer {
        Transfer {
            from_category: from.into(),
            to_category: to.into(),
            amount,
            rationale: String::new(),
        }
    }

    #[test]
    fn test_planner_output_verifies() {
        let profile = demo_profile();
        let devs = deviations();
        let plan = ReallocationPlanner::new(&profile.categories).plan(&devs);

        let result = create_default_verifier().verify(&plan, &devs);
        assert!(result.verified, "{:?}", result.issues);
        assert_eq!(result.checks.len(), 3);
    }

    #[test]
    fn test_overdrawn_donor_is_flagged() {
        let plan = ReallocationPlan {
            transfers: vec![transfer("Entertainment", "Food", 150.0)],
            shortfalls: vec![],
            proposed_budget: vec![],
        };
        let result = create_default_verifier().verify(&plan, &deviations());
        assert!(!result.verified);
        assert!(result.issues.iter().any(|i| i.starts_with("donor_balance_non_negative")));
    }

    #[test]
    fn test_premature_essential_draw_is_flagged() {
        let mut devs = deviations();
        devs[2] = dev("Savings", 300.0, 100.0, true);
        let plan = ReallocationPlan {
            transfers: vec![transfer("Savings", "Food", 150.0)],
            shortfalls: vec![],
            proposed_budget: vec![],
        };
        let result = create_default_verifier().verify(&plan, &devs);
        assert!(result.issues.iter().any(|i| i.starts_with("essential_donors_last")));
    }

    #[test]
    fn test_silently_dropped_overage_is_flagged() {
        let plan = ReallocationPlan {
            transfers: vec![transfer("Entertainment", "Food", 60.0)],
            shortfalls: vec![Shortfall { category: "Food".into(), amount: 10.0 }],
            proposed_budget: vec![],
        };
        let result = create_default_verifier().verify(&plan, &deviations());
        assert!(result.issues.iter().any(|i| i.starts_with("overage_accounted_for")));
    }
}
