//! Gemini API client
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::AgentError;
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: GEMINI_ENDPOINT.to_string(),
        })
    }

    /// Generate a response and return the text of the first candidate.
    pub async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(AgentError::Backend("GEMINI_API_KEY not configured".to_string()));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
                response_mime_type: "application/json".to_string(),
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
        };

        info!("Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                AgentError::Backend(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(AgentError::Backend(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            AgentError::Backend(format!("Gemini parse error: {}", e))
        })?;

        let answer = extract_answer(&gemini_response)?;

        info!(chars = answer.len(), "Gemini response received");

        Ok(answer)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
    response_mime_type: String,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

/// Text of the first candidate. A candidate cut short (token limit, safety
/// block) cannot hold a complete JSON decision, so it is rejected.
fn extract_answer(response: &GeminiResponse) -> Result<String> {
    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| AgentError::Backend("Empty response from Gemini".to_string()))?;

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if reason != "STOP" {
            return Err(AgentError::Backend(format!(
                "Gemini stopped early ({})",
                reason
            )));
        }
    }

    candidate
        .content
        .parts
        .first()
        .map(|p| p.text.clone())
        .ok_or_else(|| AgentError::Backend("Gemini candidate has no text".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: "What next?".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
                response_mime_type: "application/json".to_string(),
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: "You are a budgeting agent".to_string(),
                }],
            },
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("What next?"));
        assert!(json.contains("generationConfig"));
        assert!(json.contains("maxOutputTokens"));
    }

    fn response(finish_reason: &str) -> GeminiResponse {
        serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"action\":\"final\",\"summary\":\"done\"}" }] },
                "finishReason": finish_reason
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_complete_candidate_is_returned() {
        let answer = extract_answer(&response("STOP")).unwrap();
        assert!(answer.contains("\"final\""));
    }

    #[test]
    fn test_truncated_candidate_is_backend_error() {
        for reason in ["MAX_TOKENS", "SAFETY"] {
            let err = extract_answer(&response(reason)).unwrap_err();
            assert!(matches!(err, AgentError::Backend(_)));
            assert!(err.to_string().contains(reason));
        }

        let empty = GeminiResponse { candidates: Vec::new() };
        assert!(matches!(extract_answer(&empty), Err(AgentError::Backend(_))));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_backend_error() {
        let client = GeminiClient::new(String::new()).unwrap();
        let err = client.generate("hi", "system").await.unwrap_err();
        assert!(matches!(err, AgentError::Backend(_)));
    }
}
