//! Agent tools.
//!
//! Tools are exposed to the model as callable functions and dispatched by
//! name through a [`ToolRegistry`].
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              ToolRegistry                │
//! │  ┌──────────────────┐ ┌───────────────┐  │
//! │  │   pdf_search     │ │  web_search   │  │
//! │  │ retriever +      │ │ provider top-k│  │
//! │  │ synthesizer      │ │ snippets      │  │
//! │  └──────────────────┘ └───────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!          ToolAgent::run() decision loop
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::format::format_docs;
use crate::llm::ToolSpec;
use crate::models::ToolName;
use crate::retriever::FreshnessGatedRetriever;
use crate::synthesize::GroundedSynthesizer;
use crate::web_search::{format_results, WebSearchProvider};

/// A capability the agent may invoke with a text query.
///
/// `execute` returns the text the model sees as the tool result. Soft
/// failures (nothing found) are ordinary results; `Err` means the tool
/// could not run.
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolName;

    fn description(&self) -> &str;

    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// OpenAI function-calling parameter schema.
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String>;
}

/// Pull the `query` argument out of a tool call.
///
/// Accepts `{"query": "..."}` or a bare string, which is what models send
/// when the arguments fail to parse as JSON.
pub fn query_param(params: &Value) -> Result<String> {
    let query = match params {
        Value::String(s) => s.as_str(),
        other => other.get("query").and_then(Value::as_str).unwrap_or(""),
    };
    if query.trim().is_empty() {
        anyhow::bail!("query must not be empty");
    }
    Ok(query.to_string())
}

/// Search the research corpus and answer from it.
pub struct PdfSearchTool {
    retriever: Arc<FreshnessGatedRetriever>,
    synthesizer: Arc<GroundedSynthesizer>,
}

impl PdfSearchTool {
    pub fn new(retriever: Arc<FreshnessGatedRetriever>, synthesizer: Arc<GroundedSynthesizer>) -> Self {
        Self {
            retriever,
            synthesizer,
        }
    }
}

#[async_trait]
impl Tool for PdfSearchTool {
    fn kind(&self) -> ToolName {
        ToolName::PdfSearch
    }

    fn description(&self) -> &str {
        "Search PDFs & Azure Search for UX research answers."
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let query = query_param(&params)?;
        let retrieval = self.retriever.retrieve(&query).await?;

        if !retrieval.found {
            return Ok(format_docs(&retrieval.documents));
        }

        let context = format_docs(&retrieval.documents);
        debug!(
            target: "tools",
            docs = retrieval.documents.len(),
            context_chars = context.chars().count(),
            "pdf_search synthesizing"
        );
        Ok(self.synthesizer.synthesize(&context, &query).await?)
    }
}

/// Top-k web snippets for current, general information.
pub struct WebSearchTool {
    provider: Arc<dyn WebSearchProvider>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn WebSearchProvider>, max_results: usize) -> Self {
        Self {
            provider,
            max_results,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn kind(&self) -> ToolName {
        ToolName::WebSearch
    }

    fn description(&self) -> &str {
        "Search the public web (returns top-k snippets)."
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let query = query_param(&params)?;
        let results = self.provider.search(&query, self.max_results).await?;
        Ok(format_results(&results))
    }
}

/// Registry of the tools exposed to the agent.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. Lookups return the first tool registered under a name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Function definitions handed to the model.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
