//! Deviation Detector
//!
//! Pure comparison of actual against budgeted spend per category.

use crate::models::{round_cents, Deviation, Transaction, UserProfile};
use std::cmp::Ordering;

/// Sum expense magnitudes per category, in declaration order.
///
/// `Uncategorized` spend, and any label the profile does not declare, lands in
/// the catch-all category so the per-category totals add up to the whole.
/// Transactions without an assignment are not counted.
pub fn actual_by_category(transactions: &[Transaction], profile: &UserProfile) -> Vec<(String, f64)> {
    let mut totals: Vec<(String, f64)> = profile
        .categories
        .iter()
        .map(|c| (c.name.clone(), 0.0))
        .collect();

    let catch_all = profile
        .catch_all_category()
        .and_then(|name| totals.iter().position(|(n, _)| n == name));

    for tx in transactions.iter().filter(|t| t.is_expense()) {
        let Some(assigned) = tx.assigned_category.as_deref() else {
            continue;
        };

        let slot = totals
            .iter()
            .position(|(name, _)| name == assigned)
            .or(catch_all);

        if let Some(slot) = slot {
            totals[slot].1 += tx.expense_amount();
        }
    }

    for total in totals.iter_mut() {
        total.1 = round_cents(total.1);
    }

    totals
}

/// Severity floored at zero; zero-budget categories are defined as zero.
pub fn severity(budgeted: f64, actual: f64) -> f64 {
    if budgeted <= 0.0 {
        return 0.0;
    }
    ((actual - budgeted) / budgeted).max(0.0)
}

/// Full deviation set, sorted by descending severity with declaration order
/// breaking ties.
pub fn detect(transactions: &[Transaction], profile: &UserProfile) -> Vec<Deviation> {
    let actuals = actual_by_category(transactions, profile);

    let mut deviations: Vec<(usize, Deviation)> = profile
        .categories
        .iter()
        .zip(actuals)
        .enumerate()
        .map(|(order, (budget, (_, actual)))| {
            (
                order,
                Deviation {
                    category: budget.name.clone(),
                    budgeted_amount: budget.budgeted_amount,
                    actual_amount: actual,
                    severity: severity(budget.budgeted_amount, actual),
                    essential: budget.essential,
                },
            )
        })
        .collect();

    deviations.sort_by(|(ia, a), (ib, b)| {
        b.severity
            .partial_cmp(&a.severity)
            .unwrap_or(Ordering::Equal)
            .then(ia.cmp(ib))
    });

    deviations.into_iter().map(|(_, d)| d).collect()
}

/// Categories whose spend exceeds the allocation.
pub fn over_budget(deviations: &[Deviation]) -> impl Iterator<Item = &Deviation> {
    deviations.iter().filter(|d| d.is_over_budget())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::demo_profile;
    use crate::models::UNCATEGORIZED;

    fn tx(id: &str, category: Option<&str>, amount: f64) -> Transaction {
        Transaction {
            id: id.to_string(),
            merchant: format!("merchant-{}", id),
            description: None,
            amount,
            timestamp: "2026-09-14T12:00:00Z".parse().unwrap(),
            category_hint: None,
            assigned_category: category.map(String::from),
        }
    }

    fn example_transactions() -> Vec<Transaction> {
        vec![
            tx("1", Some("Food"), -300.0),
            tx("2", Some("Food"), -250.0),
            tx("3", Some("Entertainment"), -40.0),
            tx("4", Some("Savings"), -300.0),
            tx("5", Some("Housing"), -1200.0),
            tx("6", Some("Transport"), -150.0),
            tx("7", Some("Other"), -100.0),
        ]
    }

    #[test]
    fn test_example_deviation_set() {
        let deviations = detect(&example_transactions(), &demo_profile());

        assert_eq!(deviations.len(), 6);
        assert_eq!(deviations[0].category, "Food");
        assert_eq!(deviations[0].severity, 0.375);
        assert_eq!(over_budget(&deviations).count(), 1);

        // Remaining ties at zero keep declaration order.
        let rest: Vec<&str> = deviations[1..].iter().map(|d| d.category.as_str()).collect();
        assert_eq!(rest, vec!["Entertainment", "Savings", "Housing", "Transport", "Other"]);
    }

    #[test]
    fn test_totals_conserve_expense_including_uncategorized() {
        let mut txs = example_transactions();
        txs.push(tx("8", Some(UNCATEGORIZED), -35.5));
        txs.push(tx("9", Some("Food"), 2000.0)); // income
        txs.push(tx("10", None, -999.0)); // not yet categorized

        let totals = actual_by_category(&txs, &demo_profile());
        let sum: f64 = totals.iter().map(|(_, v)| v).sum();
        let expected: f64 = txs
            .iter()
            .filter(|t| t.assigned_category.is_some())
            .map(|t| t.expense_amount())
            .sum();

        assert!((sum - expected).abs() < 1e-9);
        assert_eq!(totals.iter().find(|(n, _)| n == "Other").unwrap().1, 135.5);
    }

    #[test]
    fn test_severity_zero_iff_within_budget() {
        assert_eq!(severity(100.0, 100.0), 0.0);
        assert_eq!(severity(100.0, 40.0), 0.0);
        assert!(severity(100.0, 100.01) > 0.0);
        assert_eq!(severity(0.0, 50.0), 0.0);
    }

    #[test]
    fn test_sorted_descending() {
        let mut txs = example_transactions();
        txs.push(tx("11", Some("Entertainment"), -160.0)); // 200 vs 100 => 1.0

        let deviations = detect(&txs, &demo_profile());
        assert_eq!(deviations[0].category, "Entertainment");
        assert_eq!(deviations[1].category, "Food");
        for pair in deviations.windows(2) {
            assert!(pair[0].severity >= pair[1].severity);
        }
    }

    #[test]
    fn test_detection_is_idempotent() {
        let txs = example_transactions();
        let first = serde_json::to_string(&detect(&txs, &demo_profile())).unwrap();
        let second = serde_json::to_string(&detect(&txs, &demo_profile())).unwrap();
        assert_eq!(first, second);
    }
}
