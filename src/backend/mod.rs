//! Reasoning backend trait and implementations
//!
//! The backend is the loop's decision function: given the run so far and the
//! capabilities currently on offer, it picks one capability or declares the
//! analysis finished. It never executes anything itself.

use crate::memory::render_replay;
use crate::models::ReasoningStep;
use crate::state::RunSnapshot;
use crate::tools::{describe, Capability, CapabilityCall};
use crate::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub mod gemini;
pub use gemini::GeminiBackend;

/// Everything a backend may look at when deciding.
pub struct DecisionContext<'a> {
    pub run_id: Uuid,
    pub cycle: u32,
    pub max_cycles: u32,
    pub snapshot: RunSnapshot,
    pub steps: &'a [ReasoningStep],
    pub catalog: Vec<Capability>,
}

impl DecisionContext<'_> {
    pub fn offers(&self, capability: Capability) -> bool {
        self.catalog.contains(&capability)
    }

    /// Prompt-ready rendering: state summary, full log replay, catalog.
    pub fn render(&self) -> String {
        format!(
            "## Run State\n\n{}\n\nCycle {} of {}\n\n{}\n## Available Capabilities\n\n{}\n",
            self.snapshot,
            self.cycle,
            self.max_cycles,
            render_replay(self.steps),
            describe(&self.catalog)
        )
    }
}

#[derive(Debug, Clone)]
pub enum Decision {
    Invoke(CapabilityCall),
    Final { summary: String },
}

/// Trait for next-step selection (LLM or rules)
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn decide(&self, ctx: &DecisionContext<'_>) -> Result<Decision>;
}

const MAX_FETCH_ATTEMPTS: u32 = 2;

/// Deterministic standard procedure:
/// fetch, categorize, detect, then reallocate and research when over budget.
///
/// Keeps the system functional without an LLM.
pub struct RuleBasedBackend;

impl RuleBasedBackend {
    fn finish(ctx: &DecisionContext<'_>) -> Decision {
        let s = &ctx.snapshot;
        let summary = if s.transactions == 0 {
            format!("No transactions were found for {}.", s.period)
        } else if s.over_budget.is_empty() {
            format!(
                "Reviewed {} transactions; every category is within budget.",
                s.transactions
            )
        } else {
            let categories: Vec<&str> = s.over_budget.iter().map(|(c, _)| c.as_str()).collect();
            format!(
                "Reviewed {} transactions; over budget in {}.",
                s.transactions,
                categories.join(", ")
            )
        };
        Decision::Final { summary }
    }

    fn pending(ctx: &DecisionContext<'_>, capability: Capability, done: bool) -> bool {
        !done && ctx.offers(capability) && !ctx.snapshot.failed.contains(&capability)
    }
}

#[async_trait]
impl ReasoningBackend for RuleBasedBackend {
    fn name(&self) -> &'static str {
        "rule-based"
    }

    async fn decide(&self, ctx: &DecisionContext<'_>) -> Result<Decision> {
        let s = &ctx.snapshot;

        if ctx.offers(Capability::FetchTransactions) {
            let fetch_failed = s.failed.contains(&Capability::FetchTransactions);
            if s.fetch_attempts == 0 {
                return Ok(Decision::Invoke(CapabilityCall::new(
                    Capability::FetchTransactions,
                    "No transaction data yet; fetch before anything else.",
                )));
            }
            if fetch_failed && s.fetch_attempts < MAX_FETCH_ATTEMPTS {
                return Ok(Decision::Invoke(CapabilityCall::new(
                    Capability::FetchTransactions,
                    "The last fetch timed out; try once more.",
                )));
            }
            // An empty period stays empty on a second fetch.
            return Ok(Self::finish(ctx));
        }

        if Self::pending(ctx, Capability::Categorize, s.categorized) {
            return Ok(Decision::Invoke(CapabilityCall::new(
                Capability::Categorize,
                format!("{} transactions need a budget category.", s.transactions),
            )));
        }

        if Self::pending(ctx, Capability::DetectDeviations, s.detected) {
            return Ok(Decision::Invoke(CapabilityCall::new(
                Capability::DetectDeviations,
                "Transactions are categorized; compare spend against the budget.",
            )));
        }

        if Self::pending(ctx, Capability::Reallocate, s.planned) {
            return Ok(Decision::Invoke(CapabilityCall::new(
                Capability::Reallocate,
                format!(
                    "{} categor{} over budget; look for surplus to move.",
                    s.over_budget.len(),
                    if s.over_budget.len() == 1 { "y is" } else { "ies are" }
                ),
            )));
        }

        if Self::pending(ctx, Capability::Research, s.researched) {
            return Ok(Decision::Invoke(CapabilityCall::new(
                Capability::Research,
                "Find practical savings tips for the over-budget categories.",
            )));
        }

        Ok(Self::finish(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::demo_profile;
    use crate::models::BillingPeriod;
    use crate::state::AgentRun;
    use crate::tools::catalog;
    use chrono::NaiveDate;

    fn base_snapshot() -> RunSnapshot {
        let profile = demo_profile();
        let period = BillingPeriod::new(
            NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
        )
        .unwrap();
        let mut snapshot = AgentRun::new(&profile, period).snapshot();
        snapshot.fetch_attempts = 1;
        snapshot
    }

    async fn next(snapshot: RunSnapshot) -> Decision {
        let ctx = DecisionContext {
            run_id: Uuid::new_v4(),
            cycle: 1,
            max_cycles: 4,
            catalog: catalog(&snapshot),
            snapshot,
            steps: &[],
        };
        RuleBasedBackend.decide(&ctx).await.unwrap()
    }

    fn invoked(decision: Decision) -> Option<Capability> {
        match decision {
            Decision::Invoke(call) => Some(call.capability),
            Decision::Final { .. } => None,
        }
    }

    #[tokio::test]
    async fn test_standard_procedure_order() {
        let mut s = base_snapshot();
        s.transactions = 7;
        assert_eq!(invoked(next(s.clone()).await), Some(Capability::Categorize));

        s.categorized = true;
        assert_eq!(invoked(next(s.clone()).await), Some(Capability::DetectDeviations));

        s.detected = true;
        s.over_budget = vec![("Food".into(), 150.0)];
        assert_eq!(invoked(next(s.clone()).await), Some(Capability::Reallocate));

        s.planned = true;
        assert_eq!(invoked(next(s.clone()).await), Some(Capability::Research));

        s.researched = true;
        assert_eq!(invoked(next(s).await), None);
    }

    #[tokio::test]
    async fn test_within_budget_finishes_after_detection() {
        let mut s = base_snapshot();
        s.transactions = 7;
        s.categorized = true;
        s.detected = true;

        match next(s).await {
            Decision::Final { summary } => assert!(summary.contains("within budget")),
            other => panic!("expected final answer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_capability_is_skipped() {
        let mut s = base_snapshot();
        s.transactions = 7;
        s.categorized = true;
        s.detected = true;
        s.over_budget = vec![("Food".into(), 150.0)];
        s.failed = vec![Capability::Reallocate];

        assert_eq!(invoked(next(s).await), Some(Capability::Research));
    }

    #[tokio::test]
    async fn test_empty_period_finishes() {
        let s = base_snapshot();
        match next(s).await {
            Decision::Final { summary } => assert!(summary.contains("No transactions")),
            other => panic!("expected final answer, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timed_out_fetch_is_retried_once() {
        let mut s = base_snapshot();
        s.failed = vec![Capability::FetchTransactions];
        assert_eq!(
            invoked(next(s.clone()).await),
            Some(Capability::FetchTransactions)
        );

        s.fetch_attempts = 2;
        assert_eq!(invoked(next(s).await), None);
    }

    #[test]
    fn test_render_includes_replay_and_catalog() {
        let s = base_snapshot();
        let ctx = DecisionContext {
            run_id: Uuid::new_v4(),
            cycle: 2,
            max_cycles: 4,
            catalog: catalog(&s),
            snapshot: s,
            steps: &[],
        };
        let rendered = ctx.render();
        assert!(rendered.contains("Cycle 2 of 4"));
        assert!(rendered.contains("## Reasoning Log"));
        assert!(rendered.contains("- fetch-transactions:"));
    }
}
