//! Reallocation Planner
//!
//! Greedy, deterministic transfer plan from under-spent categories to
//! over-spent ones. Discretionary donors are drained before essential ones,
//! and no donor ever goes below its break-even point.

use crate::models::{
    round_cents, BudgetLine, CategoryBudget, Deviation, ReallocationPlan, Shortfall, Transaction,
    Transfer, MONEY_EPSILON,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

pub const TRANSFER_REASON: &str = "surplus reallocation";

/// Why a category ran over, derived from its transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum SpendingPattern {
    LargeExpense { merchant: String, amount: f64 },
    RecurringMerchant { merchants: Vec<String> },
    FrequentSmall { count: usize, average: f64 },
    General { count: usize },
    NoData,
}

impl SpendingPattern {
    pub fn analyze(category: &str, transactions: &[Transaction]) -> Self {
        let spent: Vec<&Transaction> = transactions
            .iter()
            .filter(|t| t.is_expense() && t.assigned_category.as_deref() == Some(category))
            .collect();

        if spent.is_empty() {
            return SpendingPattern::NoData;
        }

        let total: f64 = spent.iter().map(|t| t.expense_amount()).sum();
        let average = total / spent.len() as f64;

        let largest = spent
            .iter()
            .max_by(|a, b| {
                a.expense_amount()
                    .partial_cmp(&b.expense_amount())
                    .unwrap_or(Ordering::Equal)
            })
            .copied();

        if let Some(largest) = largest {
            if spent.len() > 1 && largest.expense_amount() > average * 2.0 {
                return SpendingPattern::LargeExpense {
                    merchant: largest.merchant.clone(),
                    amount: round_cents(largest.expense_amount()),
                };
            }
        }

        let mut counts: Vec<(String, usize)> = Vec::new();
        for tx in &spent {
            match counts.iter_mut().find(|(m, _)| *m == tx.merchant) {
                Some((_, n)) => *n += 1,
                None => counts.push((tx.merchant.clone(), 1)),
            }
        }
        let recurring: Vec<String> = counts
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(m, _)| m)
            .take(2)
            .collect();

        if !recurring.is_empty() {
            SpendingPattern::RecurringMerchant { merchants: recurring }
        } else if spent.len() > 5 {
            SpendingPattern::FrequentSmall {
                count: spent.len(),
                average: round_cents(average),
            }
        } else {
            SpendingPattern::General { count: spent.len() }
        }
    }

    fn context(&self, category: &str) -> String {
        match self {
            SpendingPattern::LargeExpense { merchant, amount } => format!(
                "The {} overage was driven by a large expense at {} ({:.2}). ",
                category, merchant, amount
            ),
            SpendingPattern::RecurringMerchant { merchants } => format!(
                "The {} category shows recurring spending at {}. ",
                category,
                merchants.join(", ")
            ),
            SpendingPattern::FrequentSmall { count, .. } => format!(
                "The {} overage comes from {} small transactions. ",
                category, count
            ),
            SpendingPattern::General { .. } | SpendingPattern::NoData => String::new(),
        }
    }
}

/// Merchants with the largest spend in `category`, biggest first.
pub fn top_merchants(category: &str, transactions: &[Transaction], limit: usize) -> Vec<String> {
    let mut totals: Vec<(String, f64)> = Vec::new();
    for tx in transactions
        .iter()
        .filter(|t| t.is_expense() && t.assigned_category.as_deref() == Some(category))
    {
        match totals.iter_mut().find(|(m, _)| *m == tx.merchant) {
            Some((_, total)) => *total += tx.expense_amount(),
            None => totals.push((tx.merchant.clone(), tx.expense_amount())),
        }
    }

    totals.sort_by(|(ma, a), (mb, b)| {
        b.partial_cmp(a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| ma.cmp(mb))
    });
    totals.into_iter().take(limit).map(|(m, _)| m).collect()
}

struct Donor<'a> {
    category: &'a str,
    essential: bool,
    order: usize,
    remaining: f64,
}

pub struct ReallocationPlanner<'a> {
    budgets: &'a [CategoryBudget],
    patterns: HashMap<String, SpendingPattern>,
}

impl<'a> ReallocationPlanner<'a> {
    pub fn new(budgets: &'a [CategoryBudget]) -> Self {
        Self {
            budgets,
            patterns: HashMap::new(),
        }
    }

    /// Attach per-category spending patterns used in transfer rationales.
    pub fn with_patterns(mut self, patterns: HashMap<String, SpendingPattern>) -> Self {
        self.patterns = patterns;
        self
    }

    fn order_of(&self, category: &str) -> usize {
        self.budgets
            .iter()
            .position(|b| b.name == category)
            .unwrap_or(usize::MAX)
    }

    pub fn plan(&self, deviations: &[Deviation]) -> ReallocationPlan {
        let mut donors: Vec<Donor> = deviations
            .iter()
            .filter(|d| !d.is_over_budget() && d.surplus() > MONEY_EPSILON)
            .map(|d| Donor {
                category: d.category.as_str(),
                essential: d.essential,
                order: self.order_of(&d.category),
                remaining: d.surplus(),
            })
            .collect();

        donors.sort_by(|a, b| {
            a.essential
                .cmp(&b.essential)
                .then(
                    b.remaining
                        .partial_cmp(&a.remaining)
                        .unwrap_or(Ordering::Equal),
                )
                .then(a.order.cmp(&b.order))
        });

        let mut receivers: Vec<&Deviation> = deviations.iter().filter(|d| d.is_over_budget()).collect();
        receivers.sort_by(|a, b| {
            b.severity
                .partial_cmp(&a.severity)
                .unwrap_or(Ordering::Equal)
                .then(self.order_of(&a.category).cmp(&self.order_of(&b.category)))
        });

        let mut transfers = Vec::new();
        let mut shortfalls = Vec::new();

        for receiver in receivers {
            let mut need = receiver.overage();

            for donor in donors.iter_mut() {
                if need <= MONEY_EPSILON {
                    break;
                }
                if donor.remaining <= MONEY_EPSILON {
                    continue;
                }

                let amount = round_cents(need.min(donor.remaining));
                donor.remaining = round_cents(donor.remaining - amount);
                need = round_cents(need - amount);

                debug!(
                    from = donor.category,
                    to = %receiver.category,
                    amount,
                    "Planned transfer"
                );

                transfers.push(Transfer {
                    from_category: donor.category.to_string(),
                    to_category: receiver.category.clone(),
                    amount,
                    rationale: self.rationale(donor.category, donor.essential, &receiver.category, amount),
                });
            }

            if need > MONEY_EPSILON {
                shortfalls.push(Shortfall {
                    category: receiver.category.clone(),
                    amount: need,
                });
            }
        }

        let proposed_budget = self
            .budgets
            .iter()
            .map(|b| {
                let incoming: f64 = transfers
                    .iter()
                    .filter(|t| t.to_category == b.name)
                    .map(|t| t.amount)
                    .sum();
                let outgoing: f64 = transfers
                    .iter()
                    .filter(|t| t.from_category == b.name)
                    .map(|t| t.amount)
                    .sum();
                BudgetLine {
                    category: b.name.clone(),
                    amount: round_cents(b.budgeted_amount + incoming - outgoing),
                }
            })
            .collect();

        ReallocationPlan {
            transfers,
            shortfalls,
            proposed_budget,
        }
    }

    fn rationale(&self, from: &str, from_essential: bool, to: &str, amount: f64) -> String {
        let context = self
            .patterns
            .get(to)
            .map(|p| p.context(to))
            .unwrap_or_default();

        let flexibility = if from_essential {
            format!("{} is essential and is only drawn on after discretionary surplus is used", from)
        } else {
            format!("{} has flexible spending that can absorb the change", from)
        };

        format!(
            "{}Move {:.2} from {} to {} ({}). {}.",
            context, amount, from, to, TRANSFER_REASON, flexibility
        )
    }
}
