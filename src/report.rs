//! Final report assembly
//!
//! Reads the terminal run state and produces the `AnalysisReport`. The
//! fingerprint covers only the deterministic parts (deviations and plan), so
//! two runs over the same categorized data hash identically.

use crate::models::{AnalysisReport, BudgetStatus};
use crate::state::AgentRun;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;

pub fn assemble(run: &AgentRun<'_>, backend_summary: Option<String>) -> AnalysisReport {
    let deviations = run.deviations.clone().unwrap_or_default();
    let over: Vec<&str> = deviations
        .iter()
        .filter(|d| d.is_over_budget())
        .map(|d| d.category.as_str())
        .collect();

    let status = if over.is_empty() {
        BudgetStatus::Good
    } else {
        BudgetStatus::Alert
    };

    let name = &run.profile.name;
    let mut message = if run.deviations.is_none() && run.transactions.is_empty() {
        format!("Hi {}, no transactions were found for {}.", name, run.period)
    } else if run.deviations.is_none() {
        format!(
            "Hi {}, the analysis stopped before spending could be compared with your budget.",
            name
        )
    } else if over.is_empty() {
        format!("Hi {}, your spending appears to be on track.", name)
    } else {
        format!(
            "Hi {}, I've identified spending concerns in: {}.",
            name,
            over.join(", ")
        )
    };

    if let Some(plan) = &run.plan {
        if !plan.shortfalls.is_empty() {
            message.push_str(&format!(
                " Unused budget elsewhere covers {:.2}; {:.2} remains uncovered.",
                plan.total_transferred(),
                plan.total_shortfall()
            ));
        }
    }

    AnalysisReport {
        run_id: run.run_id,
        profile_name: name.clone(),
        period: run.period,
        status,
        message,
        fingerprint: fingerprint(&(&deviations, &run.plan)),
        deviations,
        plan: run.plan.clone(),
        verification: run.verification.clone(),
        recommendations: run.recommendations.clone(),
        backend_summary,
        cycles_used: run.cycles_used,
        steps: run.log.steps().to_vec(),
        created_at: Utc::now(),
    }
}

/// SHA-256 of the JSON serialization, streamed into the hasher.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), value).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<H: Digest> Write for HashWriter<'_, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
