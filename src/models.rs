//! Core data models for the budget guardian agent

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::error::AgentError;
use crate::Result;

/// Every profile carries exactly this many budget categories.
pub const CATEGORY_COUNT: usize = 6;

/// Label assigned when no category matches with enough confidence.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Amounts closer than half a cent are treated as equal.
pub const MONEY_EPSILON: f64 = 0.005;

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

//
// ================= Profile =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Employed,
    SelfEmployed,
    Student,
    Unemployed,
    Retired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryBudget {
    pub name: String,
    pub budgeted_amount: f64,
    pub essential: bool,
}

impl CategoryBudget {
    pub fn new(name: &str, budgeted_amount: f64, essential: bool) -> Self {
        Self {
            name: name.to_string(),
            budgeted_amount,
            essential,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub location: String,
    pub monthly_income: f64,
    pub work_status: WorkStatus,
    /// Declaration order matters: it breaks severity and surplus ties.
    pub categories: Vec<CategoryBudget>,
}

impl UserProfile {
    pub fn validate(&self) -> Result<()> {
        if self.categories.len() != CATEGORY_COUNT {
            return Err(AgentError::InvalidProfile(format!(
                "expected {} categories, found {}",
                CATEGORY_COUNT,
                self.categories.len()
            )));
        }

        let mut seen = HashSet::with_capacity(CATEGORY_COUNT);
        for category in &self.categories {
            if category.name.trim().is_empty() {
                return Err(AgentError::InvalidProfile(
                    "category name must not be empty".to_string(),
                ));
            }
            if category.name == UNCATEGORIZED {
                return Err(AgentError::InvalidProfile(format!(
                    "'{}' is reserved",
                    UNCATEGORIZED
                )));
            }
            if !seen.insert(category.name.to_lowercase()) {
                return Err(AgentError::InvalidProfile(format!(
                    "duplicate category '{}'",
                    category.name
                )));
            }
            if !category.budgeted_amount.is_finite() || category.budgeted_amount < 0.0 {
                return Err(AgentError::InvalidProfile(format!(
                    "category '{}' has invalid budget {}",
                    category.name, category.budgeted_amount
                )));
            }
        }

        Ok(())
    }

    pub fn category(&self, name: &str) -> Option<&CategoryBudget> {
        self.categories.iter().find(|c| c.name == name)
    }

    pub fn category_names(&self) -> Vec<&str> {
        self.categories.iter().map(|c| c.name.as_str()).collect()
    }

    /// Category that absorbs `Uncategorized` spend: `Other` if declared, else the last one.
    pub fn catch_all_category(&self) -> Option<&str> {
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case("other"))
            .or_else(|| self.categories.last())
            .map(|c| c.name.as_str())
    }

    pub fn total_budget(&self) -> f64 {
        self.categories.iter().map(|c| c.budgeted_amount).sum()
    }
}

//
// ================= Transactions =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(AgentError::Config(format!(
                "billing period ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        let day = timestamp.date_naive();
        day >= self.start && day <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Record as delivered by an external aggregator, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub merchant: String,
    #[serde(default)]
    pub description: Option<String>,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub category_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub merchant: String,
    pub description: Option<String>,
    /// Signed; negative is an expense.
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub category_hint: Option<String>,
    pub assigned_category: Option<String>,
}

impl Transaction {
    pub fn is_expense(&self) -> bool {
        self.amount < 0.0
    }

    /// Magnitude of the expense, zero for income.
    pub fn expense_amount(&self) -> f64 {
        if self.is_expense() {
            -self.amount
        } else {
            0.0
        }
    }

    /// Text the categorizer scores against.
    pub fn match_text(&self) -> String {
        let mut text = self.merchant.to_lowercase();
        for extra in [&self.description, &self.category_hint].into_iter().flatten() {
            text.push(' ');
            text.push_str(&extra.to_lowercase());
        }
        text
    }
}

//
// ================= Analysis =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deviation {
    pub category: String,
    pub budgeted_amount: f64,
    pub actual_amount: f64,
    /// (actual - budgeted) / budgeted, floored at zero; zero when the budget is zero.
    pub severity: f64,
    pub essential: bool,
}

impl Deviation {
    pub fn is_over_budget(&self) -> bool {
        self.actual_amount - self.budgeted_amount > MONEY_EPSILON
    }

    pub fn overage(&self) -> f64 {
        round_cents((self.actual_amount - self.budgeted_amount).max(0.0))
    }

    pub fn surplus(&self) -> f64 {
        round_cents((self.budgeted_amount - self.actual_amount).max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transfer {
    pub from_category: String,
    pub to_category: String,
    pub amount: f64,
    pub rationale: String,
}

/// Overage left uncovered once every donor is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shortfall {
    pub category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetLine {
    pub category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReallocationPlan {
    pub transfers: Vec<Transfer>,
    pub shortfalls: Vec<Shortfall>,
    /// Budgets after applying every transfer, in declaration order.
    pub proposed_budget: Vec<BudgetLine>,
}

impl ReallocationPlan {
    pub fn total_transferred(&self) -> f64 {
        round_cents(self.transfers.iter().map(|t| t.amount).sum())
    }

    pub fn total_shortfall(&self) -> f64 {
        round_cents(self.shortfalls.iter().map(|s| s.amount).sum())
    }

    pub fn outgoing(&self, category: &str) -> f64 {
        round_cents(
            self.transfers
                .iter()
                .filter(|t| t.from_category == category)
                .map(|t| t.amount)
                .sum(),
        )
    }
}

//
// ================= Research =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub query: String,
    pub title: String,
    pub source: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub category: String,
    pub text: String,
    pub estimated_savings: Option<f64>,
    pub references: Vec<SourceRef>,
}

//
// ================= Reasoning Log =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepRole {
    Reasoning,
    Action,
    Observation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub index: usize,
    pub role: StepRole,
    pub content: String,
    pub tool: Option<String>,
    pub arguments: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

//
// ================= Verification =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanCheck {
    pub rule_name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanVerification {
    pub verified: bool,
    pub checks: Vec<PlanCheck>,
    pub issues: Vec<String>,
}

//
// ================= Final Report =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    Good,
    Alert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub profile_name: String,
    pub period: BillingPeriod,
    pub status: BudgetStatus,
    pub message: String,
    pub deviations: Vec<Deviation>,
    pub plan: Option<ReallocationPlan>,
    pub verification: Option<PlanVerification>,
    pub recommendations: Vec<Recommendation>,
    pub backend_summary: Option<String>,
    pub cycles_used: u32,
    pub steps: Vec<ReasoningStep>,
    /// SHA-256 over the serialized deviations and plan.
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Live feed consumed by dashboards.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Step(ReasoningStep),
    Completed(Box<AnalysisReport>),
    Failed {
        error: String,
        steps: Vec<ReasoningStep>,
    },
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkStatus::Employed => "Employed",
            WorkStatus::SelfEmployed => "Self-Employed",
            WorkStatus::Student => "Student",
            WorkStatus::Unemployed => "Unemployed",
            WorkStatus::Retired => "Retired",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for StepRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepRole::Reasoning => "reasoning",
            StepRole::Action => "action",
            StepRole::Observation => "observation",
        };
        write!(f, "{}", s)
    }
}
