//! Tavily web search collaborator

use crate::config::env_value;
use crate::error::AgentError;
use crate::models::SearchResult;
use crate::research::SearchCollaborator;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://api.tavily.com/search";

#[derive(Clone)]
pub struct TavilySearch {
    client: Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
}

impl TavilySearch {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            max_results: 3,
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// `None` when `TAVILY_API_KEY` is not set.
    pub fn from_env() -> Result<Option<Self>> {
        match env_value("TAVILY_API_KEY") {
            Some(key) => Self::new(key).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

impl From<TavilyResult> for SearchResult {
    fn from(r: TavilyResult) -> Self {
        SearchResult {
            title: r.title,
            snippet: r.content,
            source: r.url,
        }
    }
}

#[async_trait]
impl SearchCollaborator for TavilySearch {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "search_depth": "basic",
                "max_results": self.max_results,
            }))
            .send()
            .await
            .map_err(|e| AgentError::Provider(format!("Search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Provider(format!("Search returned {}", status)));
        }

        let body: TavilyResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Invalid search response: {}", e)))?;

        debug!(query, results = body.results.len(), "Search completed");

        Ok(body.results.into_iter().map(SearchResult::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results() {
        let body: TavilyResponse = serde_json::from_value(json!({
            "query": "cheap food",
            "results": [
                {"title": "Eat well for less", "url": "https://x.example/a", "content": "Cook at home", "score": 0.9},
                {"url": "https://x.example/b"}
            ]
        }))
        .unwrap();

        let results: Vec<SearchResult> = body.results.into_iter().map(Into::into).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].snippet, "Cook at home");
        assert!(results[1].title.is_empty());
    }

    #[test]
    fn test_missing_results_field() {
        let body: TavilyResponse = serde_json::from_value(json!({})).unwrap();
        assert!(body.results.is_empty());
    }
}
