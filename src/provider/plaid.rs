//! Plaid-backed transaction provider
//!
//! Calls `/transactions/get` with an already-exchanged access token.

use crate::config::env_value;
use crate::error::AgentError;
use crate::models::{BillingPeriod, RawTransaction};
use crate::provider::{AmountSign, TransactionProvider};
use crate::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://sandbox.plaid.com";

/// Plaid caps a single page at 500 records.
const MAX_PAGE: usize = 500;

#[derive(Clone)]
pub struct PlaidProvider {
    client: Client,
    base_url: String,
    client_id: String,
    secret: String,
    access_token: String,
}

impl PlaidProvider {
    pub fn new(
        base_url: &str,
        client_id: String,
        secret: String,
        access_token: String,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            secret,
            access_token,
        })
    }

    /// Build from `PLAID_*` variables; `None` when credentials are missing.
    pub fn from_env() -> Result<Option<Self>> {
        let (Some(client_id), Some(secret), Some(access_token)) = (
            env_value("PLAID_CLIENT_ID"),
            env_value("PLAID_SECRET"),
            env_value("PLAID_ACCESS_TOKEN"),
        ) else {
            return Ok(None);
        };

        let base_url = env_value("PLAID_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(&base_url, client_id, secret, access_token).map(Some)
    }
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    transactions: Vec<PlaidTransaction>,
}

#[derive(Debug, Deserialize)]
struct PlaidTransaction {
    transaction_id: String,
    amount: f64,
    date: NaiveDate,
    name: String,
    merchant_name: Option<String>,
    #[serde(default)]
    category: Option<Vec<String>>,
}

impl From<PlaidTransaction> for RawTransaction {
    fn from(t: PlaidTransaction) -> Self {
        let timestamp = t
            .date
            .and_hms_opt(12, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .unwrap_or_else(Utc::now);

        RawTransaction {
            transaction_id: Some(t.transaction_id),
            merchant: t.merchant_name.unwrap_or_else(|| t.name.clone()),
            description: Some(t.name),
            amount: t.amount,
            timestamp,
            category_hint: t.category.and_then(|c| c.into_iter().next()),
        }
    }
}

#[async_trait]
impl TransactionProvider for PlaidProvider {
    fn name(&self) -> &'static str {
        "plaid"
    }

    fn amount_sign(&self) -> AmountSign {
        AmountSign::ExpensePositive
    }

    async fn fetch(&self, period: &BillingPeriod, limit: Option<usize>) -> Result<Vec<RawTransaction>> {
        let count = limit.unwrap_or(MAX_PAGE).min(MAX_PAGE);
        let url = format!("{}/transactions/get", self.base_url);

        info!(period = %period, count, "Fetching transactions from Plaid");

        let response = self
            .client
            .post(url)
            .json(&json!({
                "client_id": self.client_id,
                "secret": self.secret,
                "access_token": self.access_token,
                "start_date": period.start.to_string(),
                "end_date": period.end.to_string(),
                "options": { "count": count },
            }))
            .send()
            .await
            .map_err(|e| AgentError::Provider(format!("Plaid request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AgentError::Provider(format!(
                "Plaid rejected credentials ({})",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider(format!(
                "Plaid returned {}: {}",
                status, body
            )));
        }

        let body: TransactionsResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Invalid Plaid response: {}", e)))?;

        debug!(count = body.transactions.len(), "Plaid transactions received");

        Ok(body.transactions.into_iter().map(RawTransaction::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaid_record_mapping() {
        let parsed: TransactionsResponse = serde_json::from_value(json!({
            "transactions": [{
                "transaction_id": "abc",
                "amount": 89.4,
                "date": "2026-09-12",
                "name": "UNITED AIRLINES 0123",
                "merchant_name": "United Airlines",
                "category": ["Travel", "Airlines and Aviation Services"]
            }]
        }))
        .unwrap();

        let raw: RawTransaction = parsed.transactions.into_iter().next().unwrap().into();
        assert_eq!(raw.transaction_id.as_deref(), Some("abc"));
        assert_eq!(raw.merchant, "United Airlines");
        assert_eq!(raw.category_hint.as_deref(), Some("Travel"));
        assert_eq!(raw.timestamp.date_naive().to_string(), "2026-09-12");
    }

    #[test]
    fn test_missing_merchant_falls_back_to_name() {
        let t = PlaidTransaction {
            transaction_id: "x".into(),
            amount: 5.0,
            date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            name: "Touch n Go".into(),
            merchant_name: None,
            category: None,
        };
        let raw = RawTransaction::from(t);
        assert_eq!(raw.merchant, "Touch n Go");
        assert!(raw.category_hint.is_none());
    }
}
