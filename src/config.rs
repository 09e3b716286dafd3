use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexesConfig,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    120
}

/// Sampling parameters for one model-backed stage.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Azure resource endpoint, or an OpenAI-compatible base URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default = "default_openai_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_agent_sampling")]
    pub agent: SamplingConfig,
    #[serde(default = "default_synthesis_sampling")]
    pub synthesis: SamplingConfig,
    #[serde(default = "default_generation_sampling")]
    pub issue: SamplingConfig,
    #[serde(default = "default_generation_sampling")]
    pub templates: SamplingConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            endpoint: None,
            deployment: None,
            api_version: default_openai_api_version(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            agent: default_agent_sampling(),
            synthesis: default_synthesis_sampling(),
            issue: default_generation_sampling(),
            templates: default_generation_sampling(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_openai_api_version() -> String {
    "2024-06-01".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_agent_sampling() -> SamplingConfig {
    SamplingConfig {
        temperature: 0.0,
        max_tokens: 512,
    }
}
fn default_synthesis_sampling() -> SamplingConfig {
    SamplingConfig {
        temperature: 0.3,
        max_tokens: 400,
    }
}
fn default_generation_sampling() -> SamplingConfig {
    SamplingConfig {
        temperature: 0.7,
        max_tokens: 500,
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexesConfig {
    pub primary: Option<SearchIndexConfig>,
    pub secondary: Option<SearchIndexConfig>,
}

const SECONDARY_CONTENT_KEY: &str = "chunk";

impl IndexesConfig {
    /// The secondary index section with its text field defaulted to
    /// `chunk`, the field the broader index stores passages under.
    pub fn secondary_index(&self) -> Option<SearchIndexConfig> {
        self.secondary.clone().map(|mut cfg| {
            cfg.content_key
                .get_or_insert_with(|| SECONDARY_CONTENT_KEY.to_string());
            cfg
        })
    }
}

/// One Azure AI Search index.
#[derive(Debug, Deserialize, Clone)]
pub struct SearchIndexConfig {
    /// Search service name (`<service>.search.windows.net`).
    pub service: String,
    pub index: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Field holding the document text; when unset, the formatter's alias
    /// list decides.
    #[serde(default)]
    pub content_key: Option<String>,
    #[serde(default = "default_search_api_version")]
    pub api_version: String,
    /// Overrides the service URL (tests, private endpoints).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Per-request HTTP timeout.
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

fn default_top_k() -> usize {
    5
}
fn default_index_timeout() -> u64 {
    15
}
fn default_search_api_version() -> String {
    "2023-11-01".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Base used to build public file URLs after upload.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Per-request HTTP timeout, applied to each listing page and upload.
    #[serde(default = "default_storage_timeout")]
    pub timeout_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_storage_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_freshness_threshold")]
    pub freshness_threshold_days: i64,
    #[serde(default = "default_missing_age")]
    pub missing_age_days: i64,
    #[serde(default = "default_document_suffix")]
    pub document_suffix: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            freshness_threshold_days: default_freshness_threshold(),
            missing_age_days: default_missing_age(),
            document_suffix: default_document_suffix(),
        }
    }
}

fn default_freshness_threshold() -> i64 {
    7
}
fn default_missing_age() -> i64 {
    999
}
fn default_document_suffix() -> String {
    ".pdf".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

fn default_max_rounds() -> usize {
    10
}
fn default_tool_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSearchConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_depth")]
    pub search_depth: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            max_results: default_max_results(),
            search_depth: default_search_depth(),
            endpoint_url: None,
        }
    }
}

fn default_max_results() -> usize {
    3
}
fn default_search_depth() -> String {
    "basic".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notify_timeout(),
        }
    }
}

impl NotifyConfig {
    /// Configured webhook, else `SLACK_WEBHOOK_URL`.
    pub fn resolved_webhook(&self) -> Option<String> {
        self.webhook_url
            .clone()
            .or_else(|| std::env::var("SLACK_WEBHOOK_URL").ok())
            .filter(|u| !u.trim().is_empty())
    }
}

fn default_notify_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_marker")]
    pub required_marker: String,
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            required_marker: default_marker(),
            allowed_extensions: default_extensions(),
        }
    }
}

fn default_marker() -> String {
    "_voc".to_string()
}
fn default_extensions() -> Vec<String> {
    vec![".pdf".to_string(), ".txt".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.request_timeout_secs == 0 {
        anyhow::bail!("server.request_timeout_secs must be > 0");
    }

    if let Some(storage) = &config.storage {
        if storage.timeout_secs == 0 {
            anyhow::bail!("storage.timeout_secs must be > 0");
        }
    }
    for (name, index) in [("primary", &config.index.primary), ("secondary", &config.index.secondary)] {
        if index.as_ref().is_some_and(|i| i.timeout_secs == 0) {
            anyhow::bail!("index.{}.timeout_secs must be > 0", name);
        }
    }

    if config.agent.max_rounds == 0 {
        anyhow::bail!("agent.max_rounds must be >= 1");
    }

    if config.retrieval.freshness_threshold_days <= 0 {
        anyhow::bail!("retrieval.freshness_threshold_days must be > 0");
    }
    if config.retrieval.missing_age_days <= config.retrieval.freshness_threshold_days {
        anyhow::bail!("retrieval.missing_age_days must exceed retrieval.freshness_threshold_days");
    }

    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.llm.model.is_none() {
                anyhow::bail!("llm.model must be specified when provider is 'openai'");
            }
        }
        "azure" => {
            if config.llm.endpoint.is_none() || config.llm.deployment.is_none() {
                anyhow::bail!("llm.endpoint and llm.deployment are required when provider is 'azure'");
            }
        }
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or azure.",
            other
        ),
    }

    match config.web_search.provider.as_str() {
        "disabled" | "tavily" => {}
        other => anyhow::bail!(
            "Unknown web_search provider: '{}'. Must be disabled or tavily.",
            other
        ),
    }
    if config.web_search.max_results == 0 {
        anyhow::bail!("web_search.max_results must be >= 1");
    }

    for (label, idx) in [
        ("index.primary", &config.index.primary),
        ("index.secondary", &config.index.secondary),
    ] {
        if let Some(idx) = idx {
            if idx.top_k == 0 {
                anyhow::bail!("{}.top_k must be >= 1", label);
            }
        }
    }

    if config.upload.allowed_extensions.is_empty() {
        anyhow::bail!("upload.allowed_extensions must not be empty");
    }

    Ok(())
}
