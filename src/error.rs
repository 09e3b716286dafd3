//! Pipeline error taxonomy.
//!
//! Retrieval soft-fails (no hits, empty web results) are not errors; they
//! degrade to marker text. Everything here is a hard failure that the HTTP
//! boundary collapses into a 500 with a stage prefix.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A retrieval hit had a shape the formatter cannot read.
    #[error("unsupported document type: {0}")]
    UnsupportedDocumentType(String),

    /// Model output was text but did not parse as the declared schema.
    #[error("malformed model output: {detail} (raw: {raw})")]
    MalformedOutput { raw: String, detail: String },

    /// Model output was neither structured, text, nor a content-bearing message.
    #[error("unexpected model output type: {0}")]
    UnexpectedOutputType(String),

    /// A tool call failed, named an unknown tool, or the agent ran out of rounds.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecutionFailure { tool: String, message: String },

    /// The model, an index, the object store, or the web-search provider was unreachable.
    #[error("{service} unavailable: {message}")]
    UpstreamServiceFailure { service: String, message: String },
}

impl PipelineError {
    pub fn malformed(raw: impl Into<String>, detail: impl ToString) -> Self {
        Self::MalformedOutput {
            raw: truncate(&raw.into(), 500),
            detail: detail.to_string(),
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl ToString) -> Self {
        Self::ToolExecutionFailure {
            tool: tool.into(),
            message: message.to_string(),
        }
    }

    /// Wrap a collaborator failure. Uses the alternate `anyhow` format so the
    /// whole context chain survives into the message.
    pub fn upstream(service: impl Into<String>, err: anyhow::Error) -> Self {
        Self::UpstreamServiceFailure {
            service: service.into(),
            message: format!("{:#}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}
