//! Transaction Provider adapter
//!
//! Fetches raw records from an external aggregator and normalizes them into
//! the internal `Transaction` shape. Failures here are fatal to a run.

use crate::models::{BillingPeriod, RawTransaction, Transaction};
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod plaid;
pub use plaid::PlaidProvider;

/// Sign convention of the aggregator's amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSign {
    /// Negative amounts are expenses (internal convention).
    ExpenseNegative,
    /// Positive amounts are outflows.
    ExpensePositive,
}

/// Trait for transaction sources
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn amount_sign(&self) -> AmountSign {
        AmountSign::ExpenseNegative
    }

    async fn fetch(&self, period: &BillingPeriod, limit: Option<usize>) -> Result<Vec<RawTransaction>>;
}

/// Normalize raw records: assign ids, drop duplicates and out-of-period
/// records, apply the sign convention and the record limit.
pub fn normalize(
    raw: Vec<RawTransaction>,
    sign: AmountSign,
    period: &BillingPeriod,
    limit: Option<usize>,
) -> Vec<Transaction> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut transactions = Vec::with_capacity(raw.len());

    for (position, record) in raw.into_iter().enumerate() {
        if !period.contains(&record.timestamp) {
            debug!(merchant = %record.merchant, "Dropping transaction outside period");
            continue;
        }

        let id = record
            .transaction_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| stable_id(&record, position));

        if !seen.insert(id.clone()) {
            warn!(transaction_id = %id, "Dropping duplicate transaction id");
            continue;
        }

        let amount = match sign {
            AmountSign::ExpenseNegative => record.amount,
            AmountSign::ExpensePositive => -record.amount,
        };

        transactions.push(Transaction {
            id,
            merchant: record.merchant.trim().to_string(),
            description: record.description,
            amount,
            timestamp: record.timestamp,
            category_hint: record.category_hint,
            assigned_category: None,
        });

        if limit.is_some_and(|max| transactions.len() >= max) {
            break;
        }
    }

    transactions
}

/// Content-derived id for records the aggregator delivered without one.
fn stable_id(record: &RawTransaction, position: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.merchant.as_bytes());
    hasher.update(record.amount.to_bits().to_be_bytes());
    hasher.update(record.timestamp.to_rfc3339().as_bytes());
    hasher.update((position as u64).to_be_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("tx_{}", &digest[..16])
}

/// In-memory provider for development & testing
pub struct StaticProvider {
    records: Vec<RawTransaction>,
    sign: AmountSign,
}

impl StaticProvider {
    pub fn new(records: Vec<RawTransaction>) -> Self {
        Self {
            records,
            sign: AmountSign::ExpenseNegative,
        }
    }

    pub fn with_sign(mut self, sign: AmountSign) -> Self {
        self.sign = sign;
        self
    }
}

#[async_trait]
impl TransactionProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    fn amount_sign(&self) -> AmountSign {
        self.sign
    }

    async fn fetch(&self, _period: &BillingPeriod, _limit: Option<usize>) -> Result<Vec<RawTransaction>> {
        Ok(self.records.clone())
    }
}

/// Reads a JSON array of raw records from disk on every fetch.
pub struct JsonFileProvider {
    path: PathBuf,
}

impl JsonFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TransactionProvider for JsonFileProvider {
    fn name(&self) -> &'static str {
        "json_file"
    }

    async fn fetch(&self, _period: &BillingPeriod, _limit: Option<usize>) -> Result<Vec<RawTransaction>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            crate::error::AgentError::Provider(format!(
                "cannot read {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let records: Vec<RawTransaction> = serde_json::from_str(&raw)?;
        Ok(records)
    }
}

/// Generates the demo month for whatever period is requested.
pub struct DemoProvider;

#[async_trait]
impl TransactionProvider for DemoProvider {
    fn name(&self) -> &'static str {
        "demo"
    }

    async fn fetch(&self, period: &BillingPeriod, _limit: Option<usize>) -> Result<Vec<RawTransaction>> {
        Ok(crate::config::demo_transactions(period))
    }
}

/// Plaid when credentials are present, then `TRANSACTIONS_PATH`, then demo data.
pub fn provider_from_env() -> Result<Arc<dyn TransactionProvider>> {
    if let Some(plaid) = PlaidProvider::from_env()? {
        info!("Using Plaid transaction provider");
        return Ok(Arc::new(plaid));
    }
    if let Some(path) = crate::config::env_value("TRANSACTIONS_PATH") {
        info!(path = %path, "Using JSON file transaction provider");
        return Ok(Arc::new(JsonFileProvider::new(path)));
    }
    info!("No transaction source configured; using demo data");
    Ok(Arc::new(DemoProvider))
}
