//! Error types for the budget guardian agent

use crate::models::ReasoningStep;
use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Run Taxonomy
    // =============================

    /// Transaction or search fetch failure (network, auth, rate limit)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Reasoning backend unreachable or returned an unparseable decision
    #[error("Backend error: {0}")]
    Backend(String),

    /// A capability's precondition was violated
    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Run cancelled")]
    Cancelled,

    // =============================
    // Setup Errors
    // =============================

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Capability errors are fed back to the backend; everything else ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AgentError::Capability(_))
    }

    /// Transient failures worth retrying against a search collaborator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Provider(_) | AgentError::Http(_) | AgentError::Timeout { .. }
        )
    }
}

/// A fatal run outcome. The partial reasoning log stays available for diagnostics.
#[derive(Error, Debug)]
#[error("Run failed: {error}")]
pub struct RunFailure {
    pub error: AgentError,
    pub steps: Vec<ReasoningStep>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_policy() {
        assert!(!AgentError::Capability("no deviations".into()).is_fatal());
        assert!(AgentError::Provider("401".into()).is_fatal());
        assert!(AgentError::Backend("garbage".into()).is_fatal());
        assert!(AgentError::Cancelled.is_fatal());
    }

    #[test]
    fn test_retryable() {
        assert!(AgentError::Provider("429".into()).is_retryable());
        assert!(AgentError::Timeout {
            operation: "search".into(),
            seconds: 5
        }
        .is_retryable());
        assert!(!AgentError::Backend("bad json".into()).is_retryable());
    }
}
