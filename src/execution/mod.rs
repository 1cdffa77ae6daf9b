//! Capability execution
//!
//! One explicit handler per capability. Handlers check their own
//! preconditions and report violations as capability errors, which the loop
//! records as observations instead of aborting. External calls run under the
//! capability timeout: a fetch that runs out of time is a capability error,
//! while research keeps whatever finished before the deadline.

use crate::config::AgentConfig;
use crate::detector;
use crate::error::AgentError;
use crate::models::{round_cents, Deviation, UNCATEGORIZED};
use crate::provider::{normalize, TransactionProvider};
use crate::reallocation::{top_merchants, ReallocationPlanner, SpendingPattern};
use crate::research::{ResearchSynthesizer, ResearchTarget, RetryPolicy, SearchCollaborator};
use crate::state::AgentRun;
use crate::tools::{Capability, CapabilityCall};
use crate::verification::{create_default_verifier, PlanVerifier};
use crate::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Merchants named per over-budget category in research.
const TOP_MERCHANTS: usize = 2;

/// What a capability produced: a one-line summary for the log and the
/// structured result.
#[derive(Debug, Clone)]
pub struct CapabilityOutcome {
    pub summary: String,
    pub data: Value,
}

pub struct CapabilityExecutor {
    provider: Arc<dyn TransactionProvider>,
    research: ResearchSynthesizer,
    verifier: PlanVerifier,
    timeout: Duration,
    limit: Option<usize>,
}

impl CapabilityExecutor {
    pub fn new(
        provider: Arc<dyn TransactionProvider>,
        search: Arc<dyn SearchCollaborator>,
        config: &AgentConfig,
    ) -> Self {
        let policy = RetryPolicy {
            max_retries: config.search_max_retries,
            base_delay: config.search_base_delay,
            timeout: config.search_timeout,
        };

        Self {
            provider,
            research: ResearchSynthesizer::new(search, policy),
            verifier: create_default_verifier(),
            timeout: config.capability_timeout,
            limit: config.window.limit(),
        }
    }

    pub fn with_verifier(mut self, verifier: PlanVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub async fn execute(&self, call: &CapabilityCall, run: &mut AgentRun<'_>) -> Result<CapabilityOutcome> {
        let start = Instant::now();

        debug!(
            run_id = %run.run_id,
            capability = %call.capability,
            arguments = %call.arguments,
            "Executing capability"
        );

        let outcome = match call.capability {
            Capability::FetchTransactions => self.fetch_transactions(run).await,
            Capability::Categorize => Self::categorize(run),
            Capability::DetectDeviations => Self::detect_deviations(run),
            Capability::Reallocate => self.reallocate(run),
            Capability::Research => self.research(&call.arguments, run).await,
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(o) => debug!(capability = %call.capability, elapsed_ms, summary = %o.summary, "Capability succeeded"),
            Err(e) => warn!(capability = %call.capability, elapsed_ms, error = %e, "Capability failed"),
        }

        outcome
    }

    async fn fetch_transactions(&self, run: &mut AgentRun<'_>) -> Result<CapabilityOutcome> {
        run.fetch_attempts += 1;

        let raw = tokio::time::timeout(self.timeout, self.provider.fetch(&run.period, self.limit))
            .await
            .map_err(|_| {
                AgentError::Capability(format!(
                    "{} fetch timed out after {}s",
                    self.provider.name(),
                    self.timeout.as_secs()
                ))
            })??;

        let received = raw.len();
        let transactions = normalize(raw, self.provider.amount_sign(), &run.period, self.limit);
        let expense_total: f64 = transactions.iter().map(|t| t.expense_amount()).sum();

        info!(
            run_id = %run.run_id,
            provider = self.provider.name(),
            received,
            kept = transactions.len(),
            "Transactions fetched"
        );

        run.transactions = transactions;
        run.categorized = false;
        run.deviations = None;
        run.plan = None;
        run.verification = None;

        Ok(CapabilityOutcome {
            summary: format!(
                "Fetched {} transactions for {} from {}",
                run.transactions.len(),
                run.period,
                self.provider.name()
            ),
            data: json!({
                "count": run.transactions.len(),
                "dropped": received - run.transactions.len(),
                "provider": self.provider.name(),
                "period": run.period,
                "expense_total": round_cents(expense_total),
            }),
        })
    }

    fn categorize(run: &mut AgentRun<'_>) -> Result<CapabilityOutcome> {
        if run.transactions.is_empty() {
            return Err(AgentError::Capability(
                "no transactions to categorize".to_string(),
            ));
        }

        let uncategorized = run.categorizer.categorize_all(&mut run.transactions);
        run.categorized = true;

        let counts = category_counts(run);

        Ok(CapabilityOutcome {
            summary: format!(
                "Categorized {} transactions ({} uncategorized)",
                run.transactions.len(),
                uncategorized
            ),
            data: json!({
                "categorized": run.transactions.len() - uncategorized,
                "uncategorized": uncategorized,
                "counts": counts,
            }),
        })
    }

    fn detect_deviations(run: &mut AgentRun<'_>) -> Result<CapabilityOutcome> {
        if !run.categorized {
            return Err(AgentError::Capability(
                "deviation detection requires categorized transactions".to_string(),
            ));
        }

        let deviations = detector::detect(&run.transactions, run.profile);
        let over: Vec<Value> = detector::over_budget(&deviations)
            .map(|d| {
                json!({
                    "category": d.category,
                    "budgeted": d.budgeted_amount,
                    "actual": d.actual_amount,
                    "severity": d.severity,
                    "overage": d.overage(),
                })
            })
            .collect();
        let total_spent: f64 = deviations.iter().map(|d| d.actual_amount).sum();

        let summary = if over.is_empty() {
            "All six categories are within budget".to_string()
        } else {
            let names: Vec<&str> = detector::over_budget(&deviations)
                .map(|d| d.category.as_str())
                .collect();
            format!("Over budget in {}", names.join(", "))
        };

        run.deviations = Some(deviations);

        Ok(CapabilityOutcome {
            summary,
            data: json!({
                "deviation_detected": !over.is_empty(),
                "over_budget": over,
                "total_spent": round_cents(total_spent),
            }),
        })
    }

    fn reallocate(&self, run: &mut AgentRun<'_>) -> Result<CapabilityOutcome> {
        let deviations = over_budget_precondition(run, "reallocation")?;

        let patterns: HashMap<String, SpendingPattern> = deviations
            .iter()
            .filter(|d| d.is_over_budget())
            .map(|d| {
                (
                    d.category.clone(),
                    SpendingPattern::analyze(&d.category, &run.transactions),
                )
            })
            .collect();

        let plan = ReallocationPlanner::new(&run.profile.categories)
            .with_patterns(patterns)
            .plan(&deviations);
        let verification = self.verifier.verify(&plan, &deviations);

        if !verification.verified {
            warn!(run_id = %run.run_id, issues = ?verification.issues, "Reallocation plan failed verification");
        }

        let summary = if plan.shortfalls.is_empty() {
            format!(
                "Planned {} transfers covering {:.2}",
                plan.transfers.len(),
                plan.total_transferred()
            )
        } else {
            format!(
                "Planned {} transfers covering {:.2}; {:.2} still uncovered",
                plan.transfers.len(),
                plan.total_transferred(),
                plan.total_shortfall()
            )
        };

        let data = json!({
            "transfers": plan.transfers,
            "shortfalls": plan.shortfalls,
            "verified": verification.verified,
        });

        run.plan = Some(plan);
        run.verification = Some(verification);

        Ok(CapabilityOutcome { summary, data })
    }

    async fn research(&self, arguments: &Value, run: &mut AgentRun<'_>) -> Result<CapabilityOutcome> {
        let mut targets: Vec<Deviation> = over_budget_precondition(run, "research")?
            .into_iter()
            .filter(|d| d.is_over_budget())
            .collect();

        // Optional narrowing: {"categories": ["Food"]}
        if let Some(requested) = arguments.get("categories").and_then(Value::as_array) {
            let wanted: Vec<String> = requested
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_lowercase)
                .collect();
            targets.retain(|d| wanted.contains(&d.category.to_lowercase()));
            if targets.is_empty() {
                return Err(AgentError::Capability(
                    "none of the requested categories is over budget".to_string(),
                ));
            }
        }

        let targets: Vec<ResearchTarget> = targets
            .into_iter()
            .map(|d| {
                let merchants = top_merchants(&d.category, &run.transactions, TOP_MERCHANTS);
                ResearchTarget::new(d).with_merchants(merchants)
            })
            .collect();

        // Research keeps whatever finished by the deadline instead of failing.
        let location = run.profile.location.clone();
        let recommendations = self
            .research
            .research(&targets, &location, self.timeout)
            .await;

        let supported = recommendations.iter().filter(|r| !r.references.is_empty()).count();
        let categories: Vec<String> = recommendations.iter().map(|r| r.category.clone()).collect();

        // A narrowed re-run replaces only the categories it covered.
        run.recommendations
            .retain(|r| !categories.contains(&r.category));
        run.recommendations.extend(recommendations);
        run.researched = true;

        Ok(CapabilityOutcome {
            summary: format!(
                "Researched {} categories ({} with sourced tips)",
                categories.len(),
                supported
            ),
            data: json!({
                "categories": categories,
                "with_sources": supported,
            }),
        })
    }
}

/// Deviations, provided detection ran and found at least one overage.
fn over_budget_precondition(run: &AgentRun<'_>, what: &str) -> Result<Vec<Deviation>> {
    let Some(deviations) = &run.deviations else {
        return Err(AgentError::Capability(format!(
            "{} requested before deviations were detected",
            what
        )));
    };

    if !deviations.iter().any(|d| d.is_over_budget()) {
        return Err(AgentError::Capability(format!(
            "{} requested with zero deviations",
            what
        )));
    }

    Ok(deviations.clone())
}

fn category_counts(run: &AgentRun<'_>) -> serde_json::Map<String, Value> {
    let mut counts = serde_json::Map::new();
    for name in run
        .profile
        .category_names()
        .into_iter()
        .chain(std::iter::once(UNCATEGORIZED))
    {
        let count = run
            .transactions
            .iter()
            .filter(|t| t.assigned_category.as_deref() == Some(name))
            .count();
        if count > 0 {
            counts.insert(name.to_string(), json!(count));
        }
    }
    counts
}
