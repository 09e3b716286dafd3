//! Document formatting.
//!
//! Index hits arrive in several shapes: already-normalized documents, JSON
//! records whose text lives under one of several field names, and bare
//! strings. [`normalize`] folds all of them into a [`RetrievedDocument`];
//! [`format_docs`] concatenates a list into the context blob handed to the
//! synthesizer.

use crate::error::{PipelineError, Result};
use crate::models::{RawDoc, RetrievedDocument};
use serde_json::Value;

/// Field names searched for the document text, in priority order.
pub const CONTENT_KEYS: [&str; 4] = ["page_content", "content", "chunk", "text"];

/// Separator placed between documents in the context blob.
pub const DOC_SEPARATOR: &str = "\n\n";

/// Normalize one index hit.
///
/// Records take the first non-empty string under [`CONTENT_KEYS`] and keep
/// the whole record as metadata. A record with none of those fields yields
/// an empty-text document, which [`format_docs`] later drops.
pub fn normalize(item: RawDoc) -> Result<RetrievedDocument> {
    match item {
        RawDoc::Document(doc) => Ok(doc),
        RawDoc::Record(map) => {
            let text = CONTENT_KEYS
                .iter()
                .filter_map(|k| map.get(*k).and_then(Value::as_str))
                .find(|s| !s.is_empty())
                .unwrap_or_default()
                .to_string();
            Ok(RetrievedDocument {
                text,
                metadata: map,
            })
        }
        RawDoc::Text(text) => Ok(RetrievedDocument::from_text(text)),
        RawDoc::Other(value) => Err(PipelineError::UnsupportedDocumentType(
            json_type_name(&value).to_string(),
        )),
    }
}

/// Normalize a batch, failing on the first unsupported hit.
pub fn normalize_all(items: Vec<RawDoc>) -> Result<Vec<RetrievedDocument>> {
    items.into_iter().map(normalize).collect()
}

/// Join document texts with a blank line, skipping empty ones.
///
/// Order is preserved. All-empty input produces an empty string.
pub fn format_docs(docs: &[RetrievedDocument]) -> String {
    docs.iter()
        .filter(|d| !d.is_empty())
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join(DOC_SEPARATOR)
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
