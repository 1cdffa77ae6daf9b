//! Runtime configuration
//!
//! Values come from the environment (optionally a `.env` file). Profiles are
//! JSON documents; a built-in demo profile is used when none is supplied.

use crate::error::AgentError;
use crate::models::{BillingPeriod, CategoryBudget, RawTransaction, UserProfile, WorkStatus};
use crate::Result;
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Hard ceiling on capability cycles per run. Configuration may only lower it.
pub const MAX_CYCLES: u32 = 4;

/// How far back to pull transactions and how many to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionWindow {
    Demo,
    Light,
    Standard,
    Comprehensive,
    Unlimited,
}

impl TransactionWindow {
    pub fn days_back(&self) -> i64 {
        match self {
            TransactionWindow::Demo => 7,
            TransactionWindow::Light => 14,
            TransactionWindow::Standard => 30,
            TransactionWindow::Comprehensive => 90,
            TransactionWindow::Unlimited => 365,
        }
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            TransactionWindow::Demo => Some(20),
            TransactionWindow::Light => Some(50),
            TransactionWindow::Standard => Some(100),
            TransactionWindow::Comprehensive => Some(500),
            TransactionWindow::Unlimited => None,
        }
    }

    /// Period ending on `today`, inclusive.
    pub fn period_ending(&self, today: NaiveDate) -> BillingPeriod {
        BillingPeriod {
            start: today - ChronoDuration::days(self.days_back() - 1),
            end: today,
        }
    }
}

impl Default for TransactionWindow {
    fn default() -> Self {
        TransactionWindow::Standard
    }
}

impl FromStr for TransactionWindow {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "demo" => Ok(TransactionWindow::Demo),
            "light" => Ok(TransactionWindow::Light),
            "standard" => Ok(TransactionWindow::Standard),
            "comprehensive" => Ok(TransactionWindow::Comprehensive),
            "unlimited" => Ok(TransactionWindow::Unlimited),
            other => Err(AgentError::Config(format!(
                "unknown transaction window '{}'",
                other
            ))),
        }
    }
}

/// Loop limits and collaborator timeouts.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_cycles: u32,
    pub capability_timeout: Duration,
    pub backend_timeout: Duration,
    pub search_timeout: Duration,
    pub search_max_retries: u32,
    pub search_base_delay: Duration,
    pub window: TransactionWindow,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_cycles: MAX_CYCLES,
            capability_timeout: Duration::from_secs(30),
            backend_timeout: Duration::from_secs(30),
            search_timeout: Duration::from_secs(10),
            search_max_retries: 2,
            search_base_delay: Duration::from_millis(200),
            window: TransactionWindow::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(cycles) = env_parse::<u32>("MAX_CYCLES")? {
            config.max_cycles = cycles;
        }
        if let Some(secs) = env_parse::<u64>("CAPABILITY_TIMEOUT_SECS")? {
            config.capability_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("BACKEND_TIMEOUT_SECS")? {
            config.backend_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("SEARCH_TIMEOUT_SECS")? {
            config.search_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env_parse::<u32>("SEARCH_MAX_RETRIES")? {
            config.search_max_retries = retries;
        }
        if let Ok(window) = env::var("TRANSACTION_WINDOW") {
            config.window = window.parse()?;
        }

        Ok(config.clamped())
    }

    /// Pull `max_cycles` back under the hard ceiling.
    pub fn clamped(mut self) -> Self {
        self.max_cycles = self.max_cycles.clamp(1, MAX_CYCLES);
        self
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AgentError::Config(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Non-empty environment value.
pub fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_profile(path: &Path) -> Result<UserProfile> {
    let raw = std::fs::read_to_string(path)?;
    let profile: UserProfile = serde_json::from_str(&raw)?;
    profile.validate()?;
    Ok(profile)
}

/// `BUDGET_PROFILE_PATH` if set, otherwise the demo profile.
pub fn profile_from_env() -> Result<UserProfile> {
    match env_value("BUDGET_PROFILE_PATH") {
        Some(path) => load_profile(Path::new(&path)),
        None => Ok(demo_profile()),
    }
}

pub fn demo_profile() -> UserProfile {
    UserProfile {
        name: "Alex".to_string(),
        location: "Kuala Lumpur".to_string(),
        monthly_income: 5000.0,
        work_status: WorkStatus::Employed,
        categories: vec![
            CategoryBudget::new("Food", 400.0, true),
            CategoryBudget::new("Entertainment", 100.0, false),
            CategoryBudget::new("Savings", 300.0, true),
            CategoryBudget::new("Housing", 1200.0, true),
            CategoryBudget::new("Transport", 200.0, false),
            CategoryBudget::new("Other", 150.0, false),
        ],
    }
}

/// Sample month for the demo profile: Food runs 150 over, everything else
/// stays within budget.
pub fn demo_transactions(period: &BillingPeriod) -> Vec<RawTransaction> {
    let records: [(&str, &str, f64); 9] = [
        ("Tesco Supermarket", "Weekly groceries", -300.0),
        ("Mamak Corner", "Restaurant dinners", -250.0),
        ("Netflix", "Streaming subscription", -40.0),
        ("Transfer to Savings", "Monthly deposit", -300.0),
        ("Monthly Rent", "Landlord payment", -1200.0),
        ("Grab", "Ride to office", -90.0),
        ("Petronas", "Petrol refill", -60.0),
        ("Misc Online Purchase", "Household bits", -100.0),
        ("Employer Sdn Bhd", "Salary credit", 5000.0),
    ];

    let span = period.days().max(1);
    records
        .iter()
        .enumerate()
        .map(|(i, (merchant, description, amount))| {
            let day = period.start + ChronoDuration::days(i as i64 % span);
            let timestamp = day
                .and_hms_opt(12, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive))
                .unwrap_or_else(Utc::now);

            RawTransaction {
                transaction_id: Some(format!("demo-{}", i + 1)),
                merchant: merchant.to_string(),
                description: Some(description.to_string()),
                amount: *amount,
                timestamp,
                category_hint: None,
            }
        })
        .collect()
}
