//! Core data models used throughout the pipeline.
//!
//! None of these are persisted: documents live for one answer, issues and
//! templates for one request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A hit as returned by a search index, before normalization.
///
/// Index clients produce [`RawDoc::Record`] for JSON hits and
/// [`RawDoc::Text`] for plain snippets. [`RawDoc::Document`] carries hits
/// that are already normalized; [`RawDoc::Other`] holds any JSON value that
/// is none of the above so the formatter can reject it by name.
#[derive(Debug, Clone)]
pub enum RawDoc {
    Document(RetrievedDocument),
    Record(Map<String, Value>),
    Text(String),
    Other(Value),
}

impl From<Value> for RawDoc {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => RawDoc::Record(map),
            Value::String(s) => RawDoc::Text(s),
            other => RawDoc::Other(other),
        }
    }
}

/// Uniform `(text, metadata)` record produced by the formatter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetrievedDocument {
    pub text: String,
    pub metadata: Map<String, Value>,
}

impl RetrievedDocument {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Age of the primary source's newest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFreshness {
    pub last_modified: Option<DateTime<Utc>>,
}

impl SourceFreshness {
    /// Whole days since the newest document was written. Absent documents
    /// report `missing_age_days`, which callers pick large enough to count
    /// as stale.
    pub fn age_days(&self, now: DateTime<Utc>, missing_age_days: i64) -> i64 {
        match self.last_modified {
            Some(ts) => (now - ts).num_days(),
            None => missing_age_days,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        };
        f.write_str(s)
    }
}

/// Role-based task lists. Exactly three roles; emptiness is not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTasks {
    #[serde(rename = "Dev")]
    pub dev: Vec<String>,
    #[serde(rename = "PM")]
    pub pm: Vec<String>,
    #[serde(rename = "Design")]
    pub design: Vec<String>,
}

impl IssueTasks {
    /// Roles in display order, paired with their task lists.
    pub fn by_role(&self) -> [(&'static str, &[String]); 3] {
        [
            ("Dev", self.dev.as_slice()),
            ("PM", self.pm.as_slice()),
            ("Design", self.design.as_slice()),
        ]
    }
}

/// Triage issue produced by the issue stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub title: String,
    pub severity: Severity,
    pub tasks: IssueTasks,
}

/// One generated CRM message and the reasoning behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMessage {
    pub copy: String,
    pub rationale: String,
}

/// Input to template generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRequest {
    #[serde(alias = "businessDesc")]
    pub business_desc: String,
    #[serde(alias = "funnelStage")]
    pub funnel_stage: String,
    pub tone: String,
    pub insight: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    PdfSearch,
    WebSearch,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::PdfSearch => "pdf_search",
            ToolName::WebSearch => "web_search",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pdf_search" => Some(ToolName::PdfSearch),
            "web_search" => Some(ToolName::WebSearch),
            _ => None,
        }
    }
}

/// Agent scratchpad entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool: ToolName,
    pub query: String,
    pub result: String,
}
