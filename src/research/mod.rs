//! Research Synthesizer
//!
//! Expands each over-budget category into several search queries, runs them
//! concurrently against the search collaborator, merges and deduplicates the
//! results by source, and distills them into one recommendation per category.
//! Search failures degrade the output; they never abort it. A whole research
//! pass shares one deadline: queries still running at the deadline are
//! dropped and synthesis proceeds with what already came back.

use crate::error::AgentError;
use crate::models::{round_cents, Deviation, Recommendation, SearchResult, SourceRef};
use crate::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub mod tavily;
pub use tavily::TavilySearch;

/// Results kept per category after merging.
const MAX_RESULTS_PER_CATEGORY: usize = 3;

const MAX_SNIPPET_CHARS: usize = 300;

/// Share of the overage a supported recommendation is expected to recover.
const SUPPORTED_SAVINGS_RATIO: f64 = 0.4;

/// Share for the built-in playbook tip used when no search result survives.
const PLAYBOOK_SAVINGS_RATIO: f64 = 0.25;

const OFF_TOPIC_TERMS: &[&str] = &[
    "construction",
    "developer",
    "real estate development",
    "infrastructure",
    "urban planning",
    "municipal",
    "contractor",
    "property investment",
    "rental listings",
];

/// External search collaborator
#[async_trait]
pub trait SearchCollaborator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>>;
}

/// Stand-in when no search service is configured; every category gets the
/// built-in playbook tip.
pub struct OfflineSearch;

#[async_trait]
impl SearchCollaborator for OfflineSearch {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>> {
        Ok(Vec::new())
    }
}

/// Tavily when `TAVILY_API_KEY` is set, otherwise offline.
pub fn search_from_env() -> Result<Arc<dyn SearchCollaborator>> {
    match TavilySearch::from_env()? {
        Some(tavily) => Ok(Arc::new(tavily)),
        None => {
            warn!("TAVILY_API_KEY not set; research will use built-in tips only");
            Ok(Arc::new(OfflineSearch))
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Attempt 0 = base delay, doubled on each retry.
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }
}

/// An over-budget category plus the merchants behind most of its spend.
#[derive(Debug, Clone)]
pub struct ResearchTarget {
    pub deviation: Deviation,
    pub merchants: Vec<String>,
}

impl ResearchTarget {
    pub fn new(deviation: Deviation) -> Self {
        Self {
            deviation,
            merchants: Vec::new(),
        }
    }

    pub fn with_merchants(mut self, merchants: Vec<String>) -> Self {
        self.merchants = merchants;
        self
    }
}

/// Reformulated queries for one category; always at least two, all distinct.
/// The top merchant, when known, gets a query of its own.
pub fn expand_queries(category: &str, location: &str, merchants: &[String]) -> Vec<String> {
    let category = category.to_lowercase();
    let location = location.trim();
    let place = if location.is_empty() {
        String::new()
    } else {
        format!(" in {}", location)
    };

    let mut queries = vec![
        format!("save money on {}{}", category, place),
        format!("how to reduce {} spending{}", category, place),
        format!("cheap {} alternatives{}", category, place),
    ];
    if let Some(merchant) = merchants.first() {
        queries.push(format!(
            "{} deals and discounts{}",
            merchant.trim().to_lowercase(),
            place
        ));
    }
    queries
}

pub struct ResearchSynthesizer {
    search: Arc<dyn SearchCollaborator>,
    policy: RetryPolicy,
}

impl ResearchSynthesizer {
    pub fn new(search: Arc<dyn SearchCollaborator>, policy: RetryPolicy) -> Self {
        Self { search, policy }
    }

    /// One recommendation per over-budget target, in input order, within `budget`.
    pub async fn research(
        &self,
        targets: &[ResearchTarget],
        location: &str,
        budget: Duration,
    ) -> Vec<Recommendation> {
        let targets: Vec<&ResearchTarget> = targets
            .iter()
            .filter(|t| t.deviation.is_over_budget())
            .collect();
        let deadline = Instant::now() + budget;

        info!(
            categories = targets.len(),
            collaborator = self.search.name(),
            budget_ms = budget.as_millis() as u64,
            "Researching savings tips"
        );

        join_all(
            targets
                .into_iter()
                .map(|t| self.research_category(t, location, deadline)),
        )
        .await
    }

    async fn research_category(
        &self,
        target: &ResearchTarget,
        location: &str,
        deadline: Instant,
    ) -> Recommendation {
        let deviation = &target.deviation;
        let queries = expand_queries(&deviation.category, location, &target.merchants);

        let outcomes = join_all(queries.iter().map(|q| async move {
            match tokio::time::timeout_at(deadline, self.search_with_retry(q)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AgentError::Timeout {
                    operation: format!("search '{}' past the research deadline", q),
                    seconds: 0,
                }),
            }
        }))
        .await;

        let mut batches = Vec::with_capacity(queries.len());
        for (query, outcome) in queries.iter().zip(outcomes) {
            match outcome {
                Ok(results) => batches.push((query.clone(), results)),
                Err(e) => warn!(
                    category = %deviation.category,
                    query = %query,
                    error = %e,
                    "Dropping failed query"
                ),
            }
        }

        let merged = merge_results(batches, &deviation.category);
        debug!(
            category = %deviation.category,
            merged = merged.len(),
            "Merged search results"
        );

        synthesize(target, location, merged)
    }

    async fn search_with_retry(&self, query: &str) -> Result<Vec<SearchResult>> {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.policy.timeout, self.search.search(query)).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout {
                    operation: format!("search '{}'", query),
                    seconds: self.policy.timeout.as_secs(),
                }),
            };

            match outcome {
                Ok(results) => return Ok(results),
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay(attempt);
                    debug!(query, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying search");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn source_key(source: &str) -> String {
    source.trim().trim_end_matches('/').to_lowercase()
}

fn is_relevant(result: &SearchResult) -> bool {
    let text = format!("{} {}", result.title, result.snippet).to_lowercase();
    !OFF_TOPIC_TERMS.iter().any(|term| text.contains(term))
}

/// Flatten per-query batches in query order, keeping the first hit per source.
pub fn merge_results(batches: Vec<(String, Vec<SearchResult>)>, category: &str) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for (query, results) in batches {
        for result in results {
            if !is_relevant(&result) {
                debug!(category, source = %result.source, "Discarding off-topic result");
                continue;
            }
            if !seen.insert(source_key(&result.source)) {
                continue;
            }
            merged.push(SourceRef {
                query: query.clone(),
                title: result.title.trim().to_string(),
                source: result.source,
                snippet: clip(&result.snippet, MAX_SNIPPET_CHARS),
            });
        }
    }

    merged
}

fn clip(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

fn synthesize(target: &ResearchTarget, location: &str, merged: Vec<SourceRef>) -> Recommendation {
    let deviation = &target.deviation;
    let overage = deviation.overage();
    let top: Vec<SourceRef> = merged.into_iter().take(MAX_RESULTS_PER_CATEGORY).collect();

    if top.is_empty() {
        return Recommendation {
            category: deviation.category.clone(),
            text: format!(
                "{} is {:.2} over budget. {}",
                deviation.category,
                overage,
                playbook_tip(&deviation.category, location, &target.merchants)
            ),
            estimated_savings: Some(round_cents(overage * PLAYBOOK_SAVINGS_RATIO)),
            references: Vec::new(),
        };
    }

    let mut text = format!(
        "{} is {:.2} over budget. Ideas worth trying{}:",
        deviation.category,
        overage,
        if location.trim().is_empty() {
            String::new()
        } else {
            format!(" around {}", location.trim())
        }
    );
    for reference in &top {
        text.push_str(&format!("\n- {}: {}", reference.title, reference.snippet));
    }

    Recommendation {
        category: deviation.category.clone(),
        text,
        estimated_savings: Some(round_cents(overage * SUPPORTED_SAVINGS_RATIO)),
        references: top,
    }
}

fn playbook_tip(category: &str, location: &str, merchants: &[String]) -> String {
    let tip = category_tip(category, location);
    match merchants {
        [] => tip,
        [only] => format!("{} Most of it went to {}; start there.", tip, only),
        [first, second, ..] => format!(
            "{} Most of it went to {} and {}; start there.",
            tip, first, second
        ),
    }
}

fn category_tip(category: &str, location: &str) -> String {
    let place = if location.trim().is_empty() {
        "your area".to_string()
    } else {
        location.trim().to_string()
    };

    match category.to_lowercase().as_str() {
        "food" => format!(
            "Cook in batches on weekends and shop at wet markets in {} instead of eating out daily.",
            place
        ),
        "transport" | "transportation" => format!(
            "Use a monthly public transit pass in {} and keep ride-hailing for the last mile only.",
            place
        ),
        "entertainment" => format!(
            "Swap paid outings for free parks, community events and museum days in {}; pause unused subscriptions.",
            place
        ),
        "housing" | "utilities" | "healthcare" => format!(
            "Review recent {} charges for one-off or seasonal costs before adjusting the budget.",
            category.to_lowercase()
        ),
        _ => format!(
            "List this month's {} purchases and set a weekly cap for the rest of the period.",
            category.to_lowercase()
        ),
    }
}
