//! Gemini-powered reasoning backend
//!
//! Sends the rendered decision context to Gemini and parses a single JSON
//! decision back. Anything that does not parse is a backend error.

use crate::backend::{Decision, DecisionContext, ReasoningBackend};
use crate::config::env_value;
use crate::error::AgentError;
use crate::gemini::GeminiClient;
use crate::tools::{Capability, CapabilityCall};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const SYSTEM_PROMPT: &str = r#"You are a personal budget analyst agent. You work through a user's transactions for one billing period and decide, one step at a time, which capability to run next.

Standard procedure:
1. Fetch the transactions if none are loaded.
2. Categorize every transaction.
3. Detect deviations right after the first categorization.
4. If any category is over budget, reallocate surplus to cover it.
5. After reallocation, research savings tips for the over-budget categories.
6. When nothing useful is left, give the final answer.

Rules:
- Only choose a capability listed under "Available Capabilities".
- If a capability failed, read the observation and adapt; do not repeat it blindly.
- You have a hard limit on cycles; finish before it if the work is done.
- Return ONLY valid JSON, no explanation text.

To run a capability:
{"action": "invoke", "capability": "<name>", "arguments": {}, "reasoning": "<one sentence>"}

To finish:
{"action": "final", "summary": "<two or three sentences for the user>"}"#;

pub struct GeminiBackend {
    client: GeminiClient,
}

impl GeminiBackend {
    pub fn new(api_key: String) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(api_key)?,
        })
    }

    /// `None` when `GEMINI_API_KEY` is not set.
    pub fn from_env() -> Result<Option<Self>> {
        match env_value("GEMINI_API_KEY") {
            Some(key) => Self::new(key).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ReasoningBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn decide(&self, ctx: &DecisionContext<'_>) -> Result<Decision> {
        let prompt = ctx.render();
        let response = self.client.generate(&prompt, SYSTEM_PROMPT).await?;

        debug!(run_id = %ctx.run_id, cycle = ctx.cycle, chars = response.len(), "Gemini decision received");

        parse_decision(&response)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum WireDecision {
    Invoke {
        capability: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        reasoning: String,
    },
    Final {
        #[serde(default)]
        summary: String,
    },
}

/// Parse a decision, tolerating markdown fences around the JSON.
pub fn parse_decision(response: &str) -> Result<Decision> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let wire: WireDecision = serde_json::from_str(cleaned).map_err(|e| {
        AgentError::Backend(format!(
            "Failed to parse Gemini decision: {} | raw={}",
            e, response
        ))
    })?;

    match wire {
        WireDecision::Invoke {
            capability,
            arguments,
            reasoning,
        } => {
            let capability: Capability = capability.parse()?;
            let arguments = if arguments.is_null() {
                Value::Object(Default::default())
            } else {
                arguments
            };
            Ok(Decision::Invoke(CapabilityCall {
                capability,
                arguments,
                reasoning,
            }))
        }
        WireDecision::Final { summary } => Ok(Decision::Final { summary }),
    }
}
