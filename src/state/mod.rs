//! Per-run state
//!
//! An `AgentRun` lives for exactly one analysis. It borrows the profile,
//! owns everything the capabilities produce, and is dropped when the report
//! has been assembled. Nothing here outlives the run.

use crate::categorizer::Categorizer;
use crate::memory::ReasoningLog;
use crate::models::{
    BillingPeriod, Deviation, PlanVerification, ReallocationPlan, Recommendation, RunEvent,
    Transaction, UserProfile, UNCATEGORIZED,
};
use crate::tools::Capability;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

pub struct AgentRun<'p> {
    pub run_id: Uuid,
    pub profile: &'p UserProfile,
    pub period: BillingPeriod,
    pub transactions: Vec<Transaction>,
    pub fetch_attempts: u32,
    pub categorized: bool,
    pub deviations: Option<Vec<Deviation>>,
    pub plan: Option<ReallocationPlan>,
    pub verification: Option<PlanVerification>,
    pub recommendations: Vec<Recommendation>,
    pub researched: bool,
    /// Capabilities whose most recent invocation failed.
    pub failed: Vec<Capability>,
    pub log: ReasoningLog,
    pub categorizer: Categorizer,
    pub cycles_used: u32,
    pub terminal: bool,
}

impl<'p> AgentRun<'p> {
    pub fn new(profile: &'p UserProfile, period: BillingPeriod) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            profile,
            period,
            transactions: Vec::new(),
            fetch_attempts: 0,
            categorized: false,
            deviations: None,
            plan: None,
            verification: None,
            recommendations: Vec::new(),
            researched: false,
            failed: Vec::new(),
            log: ReasoningLog::new(),
            categorizer: Categorizer::new(&profile.category_names()),
            cycles_used: 0,
            terminal: false,
        }
    }

    pub fn with_observer(mut self, observer: UnboundedSender<RunEvent>) -> Self {
        self.log = ReasoningLog::with_observer(observer);
        self
    }

    pub fn over_budget(&self) -> Vec<&Deviation> {
        self.deviations
            .iter()
            .flatten()
            .filter(|d| d.is_over_budget())
            .collect()
    }

    pub fn uncategorized_count(&self) -> usize {
        self.transactions
            .iter()
            .filter(|t| t.assigned_category.as_deref() == Some(UNCATEGORIZED))
            .count()
    }

    pub fn record_outcome(&mut self, capability: Capability, succeeded: bool) {
        self.failed.retain(|c| *c != capability);
        if !succeeded {
            self.failed.push(capability);
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            profile_name: self.profile.name.clone(),
            location: self.profile.location.clone(),
            period: self.period,
            transactions: self.transactions.len(),
            fetch_attempts: self.fetch_attempts,
            categorized: self.categorized,
            uncategorized: self.uncategorized_count(),
            detected: self.deviations.is_some(),
            over_budget: self
                .over_budget()
                .into_iter()
                .map(|d| (d.category.clone(), d.overage()))
                .collect(),
            planned: self.plan.is_some(),
            researched: self.researched,
            failed: self.failed.clone(),
            cycles_used: self.cycles_used,
        }
    }
}

/// Read-only view of a run handed to the reasoning backend.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub profile_name: String,
    pub location: String,
    pub period: BillingPeriod,
    pub transactions: usize,
    pub fetch_attempts: u32,
    pub categorized: bool,
    pub uncategorized: usize,
    pub detected: bool,
    /// (category, overage) in severity order.
    pub over_budget: Vec<(String, f64)>,
    pub planned: bool,
    pub researched: bool,
    pub failed: Vec<Capability>,
    pub cycles_used: u32,
}

impl fmt::Display for RunSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Profile: {} ({})", self.profile_name, self.location)?;
        writeln!(f, "Period: {}", self.period)?;
        writeln!(
            f,
            "Transactions: {} (fetch attempts: {})",
            self.transactions, self.fetch_attempts
        )?;
        writeln!(
            f,
            "Categorized: {}{}",
            if self.categorized { "yes" } else { "no" },
            if self.uncategorized > 0 {
                format!(" ({} uncategorized)", self.uncategorized)
            } else {
                String::new()
            }
        )?;

        if !self.detected {
            writeln!(f, "Deviations: not detected yet")?;
        } else if self.over_budget.is_empty() {
            writeln!(f, "Deviations: every category within budget")?;
        } else {
            let listed: Vec<String> = self
                .over_budget
                .iter()
                .map(|(category, overage)| format!("{} +{:.2}", category, overage))
                .collect();
            writeln!(f, "Deviations: {}", listed.join(", "))?;
        }

        writeln!(f, "Reallocation plan: {}", if self.planned { "ready" } else { "none" })?;
        writeln!(f, "Research: {}", if self.researched { "done" } else { "none" })?;

        if !self.failed.is_empty() {
            let failed: Vec<&str> = self.failed.iter().map(|c| c.name()).collect();
            writeln!(f, "Last attempt failed: {}", failed.join(", "))?;
        }

        write!(f, "Cycles used: {}", self.cycles_used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::demo_profile;
    use chrono::NaiveDate;

    fn period() -> BillingPeriod {
        BillingPeriod::new(
            NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_run_is_empty() {
        let profile = demo_profile();
        let run = AgentRun::new(&profile, period());

        assert!(run.log.is_empty());
        assert!(run.deviations.is_none());
        assert!(run.recommendations.is_empty());
        assert!(!run.terminal);

        let snapshot = run.snapshot();
        assert!(!snapshot.detected);
        assert!(snapshot.to_string().contains("not detected yet"));
    }

    #[test]
    fn test_record_outcome_tracks_latest_attempt() {
        let profile = demo_profile();
        let mut run = AgentRun::new(&profile, period());

        run.record_outcome(Capability::Reallocate, false);
        assert_eq!(run.failed, vec![Capability::Reallocate]);
        run.record_outcome(Capability::Reallocate, false);
        assert_eq!(run.failed.len(), 1);
        run.record_outcome(Capability::Reallocate, true);
        assert!(run.failed.is_empty());
    }

    #[test]
    fn test_snapshot_lists_overages() {
        let profile = demo_profile();
        let mut run = AgentRun::new(&profile, period());
        run.deviations = Some(vec![Deviation {
            category: "Food".into(),
            budgeted_amount: 400.0,
            actual_amount: 550.0,
            severity: 0.375,
            essential: true,
        }]);

        let summary = run.snapshot().to_string();
        assert!(summary.contains("Food +150.00"));
    }
}
