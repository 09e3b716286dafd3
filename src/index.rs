//! Document index clients.
//!
//! The retriever talks to two indexes through [`DocumentIndex`]: a private
//! primary index over ingested research PDFs and a broader secondary index.
//! The production backend is Azure AI Search, queried with the REST
//! `docs/search` endpoint.
//!
//! # Configuration
//!
//! ```toml
//! [index.primary]
//! service = "acme-search"
//! index = "rag-cust"
//!
//! [index.secondary]
//! service = "acme-search"
//! index = "rag-cust"
//! content_key = "chunk"
//! top_k = 5
//! ```
//!
//! The API key is read from `AZURE_SEARCH_KEY`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::SearchIndexConfig;
use crate::models::{RawDoc, RetrievedDocument};

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Label used in logs and errors.
    fn name(&self) -> &str;

    /// Full-text query. Zero hits is `Ok(vec![])`.
    async fn query(&self, text: &str) -> Result<Vec<RawDoc>>;
}

/// Build an index client, or an always-empty stand-in when the section is absent.
pub fn create_index(label: &str, config: Option<&SearchIndexConfig>) -> Result<Arc<dyn DocumentIndex>> {
    match config {
        Some(cfg) => Ok(Arc::new(AzureSearchIndex::new(label, cfg.clone())?)),
        None => Ok(Arc::new(UnconfiguredIndex {
            label: label.to_string(),
        })),
    }
}

/// Stand-in for an index that has no configuration. Never returns hits.
pub struct UnconfiguredIndex {
    label: String,
}

#[async_trait]
impl DocumentIndex for UnconfiguredIndex {
    fn name(&self) -> &str {
        &self.label
    }

    async fn query(&self, _text: &str) -> Result<Vec<RawDoc>> {
        Ok(Vec::new())
    }
}

pub struct AzureSearchIndex {
    label: String,
    config: SearchIndexConfig,
    api_key: String,
    client: reqwest::Client,
}

impl AzureSearchIndex {
    pub fn new(label: &str, config: SearchIndexConfig) -> Result<Self> {
        let api_key = std::env::var("AZURE_SEARCH_KEY")
            .context("AZURE_SEARCH_KEY environment variable not set")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            label: format!("{}:{}", label, config.index),
            config,
            api_key,
            client,
        })
    }

    fn search_url(&self) -> String {
        let base = self
            .config
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.search.windows.net", self.config.service));
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            base.trim_end_matches('/'),
            self.config.index,
            self.config.api_version
        )
    }
}

#[async_trait]
impl DocumentIndex for AzureSearchIndex {
    fn name(&self) -> &str {
        &self.label
    }

    async fn query(&self, text: &str) -> Result<Vec<RawDoc>> {
        let body = json!({ "search": text, "top": self.config.top_k });

        let resp = self
            .client
            .post(self.search_url())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to query index {}", self.label))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Search query on {} failed (HTTP {}): {}",
                self.label,
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        let json: Value = resp.json().await?;
        let hits = parse_search_response(&json, self.config.content_key.as_deref())?;
        debug!(target: "index", index = %self.label, hits = hits.len(), "search complete");
        Ok(hits)
    }
}

/// Turn a `docs/search` response into raw hits.
///
/// With a `content_key`, each hit is read as a document whose text is that
/// field and whose metadata is the remaining fields. Without one, hits are
/// passed on as records for the formatter to resolve.
pub fn parse_search_response(json: &Value, content_key: Option<&str>) -> Result<Vec<RawDoc>> {
    let hits = json
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow::anyhow!("Invalid search response: missing value array"))?;

    Ok(hits
        .iter()
        .cloned()
        .map(|hit| match (content_key, hit) {
            (Some(key), Value::Object(mut map)) => {
                let text = match map.remove(key) {
                    Some(Value::String(s)) => s,
                    _ => String::new(),
                };
                RawDoc::Document(RetrievedDocument {
                    text,
                    metadata: map,
                })
            }
            (_, other) => RawDoc::from(other),
        })
        .collect())
}
