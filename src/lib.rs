//! Budget Guardian
//!
//! A personal-finance agent that:
//! - Fetches one billing period of transactions
//! - Categorizes spending against a six-category budget
//! - Detects deviations and plans reallocations from surplus categories
//! - Researches savings tips for over-budget categories
//! - Records every reasoning step for replay
//!
//! LOOP:
//! START → SELECT → EXECUTE → OBSERVE → DECIDE → (SELECT | TERMINAL)

pub mod agent;
pub mod api;
pub mod backend;
pub mod categorizer;
pub mod config;
pub mod detector;
pub mod error;
pub mod execution;
pub mod gemini;
pub mod memory;
pub mod models;
pub mod provider;
pub mod reallocation;
pub mod report;
pub mod research;
pub mod state;
pub mod tools;
pub mod verification;

pub use error::{AgentError, Result, RunFailure};

// Re-export common types
pub use agent::{create_default_agent, BudgetAgent};
pub use models::*;
