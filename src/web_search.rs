//! Generic web search.
//!
//! Backs the agent's `web_search` tool. The production provider is Tavily
//! (`POST https://api.tavily.com/search`), keyed by `TAVILY_API_KEY`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::WebSearchConfig;
use crate::prompts::NO_WEB_RESULT;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebResult {
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Snippet text.
    #[serde(default)]
    pub content: String,
}

#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>>;
}

/// Build the configured provider, or `None` when web search is disabled.
pub fn create_provider(config: &WebSearchConfig) -> Result<Option<Arc<dyn WebSearchProvider>>> {
    match config.provider.as_str() {
        "tavily" => Ok(Some(Arc::new(TavilySearch::new(config)?))),
        "disabled" => Ok(None),
        other => bail!("Unknown web_search provider: {}", other),
    }
}

/// Render results as `"{title} – {snippet}"` blocks separated by blank lines,
/// or the no-result marker.
pub fn format_results(results: &[WebResult]) -> String {
    if results.is_empty() {
        return NO_WEB_RESULT.to_string();
    }
    results
        .iter()
        .map(|r| format!("{} – {}", r.title, r.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

pub struct TavilySearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    search_depth: String,
}

impl TavilySearch {
    pub fn new(config: &WebSearchConfig) -> Result<Self> {
        let api_key = std::env::var("TAVILY_API_KEY")
            .context("TAVILY_API_KEY environment variable not set")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            api_key,
            endpoint: config
                .endpoint_url
                .clone()
                .unwrap_or_else(|| "https://api.tavily.com/search".to_string()),
            search_depth: config.search_depth.clone(),
        })
    }
}

#[async_trait]
impl WebSearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>> {
        debug!(target: "web_search", query = %query, max_results, "tavily search");

        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "search_depth": self.search_depth,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .context("Web search request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("Web search returned status: {}", status);
        }

        let parsed: TavilyResponse = resp
            .json()
            .await
            .context("Failed to parse web search response")?;

        // Entries that are not result objects are skipped.
        Ok(parsed
            .results
            .into_iter()
            .filter_map(|v| serde_json::from_value::<WebResult>(v).ok())
            .take(max_results)
            .collect())
    }
}
