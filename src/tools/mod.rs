//! Capability catalog
//!
//! The loop can only ever do one of five things. Which of them are offered
//! depends on how far the run has progressed.

use crate::error::AgentError;
use crate::state::RunSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    FetchTransactions,
    Categorize,
    DetectDeviations,
    Reallocate,
    Research,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::FetchTransactions,
        Capability::Categorize,
        Capability::DetectDeviations,
        Capability::Reallocate,
        Capability::Research,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::FetchTransactions => "fetch-transactions",
            Capability::Categorize => "categorize",
            Capability::DetectDeviations => "detect-deviations",
            Capability::Reallocate => "reallocate",
            Capability::Research => "research",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Capability::FetchTransactions => "Fetch the billing period's transactions from the provider",
            Capability::Categorize => "Assign every transaction to one of the six budget categories",
            Capability::DetectDeviations => "Compare actual against budgeted spend and rank overages",
            Capability::Reallocate => "Plan transfers from under-spent to over-spent categories",
            Capability::Research => "Search for savings tips for each over-budget category",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Capability::ALL
            .into_iter()
            .find(|c| c.name() == normalized)
            .ok_or_else(|| AgentError::Backend(format!("Unknown capability '{}'", s)))
    }
}

/// A backend's request to run one capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub capability: Capability,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub reasoning: String,
}

impl CapabilityCall {
    pub fn new(capability: Capability, reasoning: impl Into<String>) -> Self {
        Self {
            capability,
            arguments: Value::Object(Default::default()),
            reasoning: reasoning.into(),
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }
}

/// Capabilities that make sense for the run as it stands.
pub fn catalog(snapshot: &RunSnapshot) -> Vec<Capability> {
    if snapshot.transactions == 0 {
        return vec![Capability::FetchTransactions];
    }
    if !snapshot.categorized {
        return vec![Capability::Categorize];
    }
    if !snapshot.detected {
        return vec![Capability::DetectDeviations];
    }

    let mut offered = vec![Capability::Categorize, Capability::DetectDeviations];
    if !snapshot.over_budget.is_empty() {
        offered.push(Capability::Reallocate);
        offered.push(Capability::Research);
    }
    offered
}

/// Catalog lines for prompts.
pub fn describe(catalog: &[Capability]) -> String {
    catalog
        .iter()
        .map(|c| format!("- {}: {}", c.name(), c.description()))
        .collect::<Vec<_>>()
        .join("\n")
}
