//! Structured-record coercion.
//!
//! Turns whatever a model call handed back into a typed record. The three
//! accepted shapes are the variants of [`ModelOutput`]:
//!
//! | Shape | Handling |
//! |---|---|
//! | `Structured(object \| array)` | deserialized directly |
//! | `Structured(string)`, `Text` | parsed as JSON text |
//! | `Message` with content | its content parsed as JSON text |
//!
//! JSON text may be wrapped in a Markdown code fence or surrounded by
//! prose; the outermost `{…}` (or `[…]`) span is tried when the whole text
//! does not parse. Any other shape is [`PipelineError::UnexpectedOutputType`];
//! a parse or validation failure is [`PipelineError::MalformedOutput`]. Nothing
//! is defaulted.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::format::json_type_name;
use crate::llm::ModelOutput;
use crate::models::{IssueRecord, TemplateMessage};

/// Top-level JSON container a record serializes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Object,
    Array,
}

impl Shape {
    fn delimiters(self) -> (char, char) {
        match self {
            Shape::Object => ('{', '}'),
            Shape::Array => ('[', ']'),
        }
    }
}

/// A schema the coercer can produce.
pub trait Record: DeserializeOwned {
    const SHAPE: Shape;

    /// Checks serde cannot express.
    fn check(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

impl Record for IssueRecord {
    const SHAPE: Shape = Shape::Object;
}

/// Number of messages a template generation must return.
pub const TEMPLATE_COUNT: usize = 3;

impl Record for Vec<TemplateMessage> {
    const SHAPE: Shape = Shape::Array;

    fn check(&self) -> std::result::Result<(), String> {
        if self.len() != TEMPLATE_COUNT {
            return Err(format!(
                "expected {} templates, got {}",
                TEMPLATE_COUNT,
                self.len()
            ));
        }
        Ok(())
    }
}

pub fn coerce<T: Record>(raw: ModelOutput) -> Result<T> {
    match raw {
        ModelOutput::Structured(value) => from_value(value),
        ModelOutput::Text(text) => from_text(&text),
        ModelOutput::Message(message) => match message.content {
            Some(content) => from_text(&content),
            None => Err(PipelineError::UnexpectedOutputType(
                "message without content".to_string(),
            )),
        },
    }
}

fn from_value<T: Record>(value: Value) -> Result<T> {
    match value {
        Value::String(text) => from_text(&text),
        Value::Object(_) | Value::Array(_) => {
            let raw = value.to_string();
            match serde_json::from_value::<T>(value.clone()) {
                Ok(record) => validated(record, &raw),
                Err(e) => match value.get("content").and_then(Value::as_str) {
                    // A serialized chat message rather than the record itself.
                    Some(content) => from_text(content),
                    None => Err(PipelineError::malformed(raw, e)),
                },
            }
        }
        other => Err(PipelineError::UnexpectedOutputType(
            json_type_name(&other).to_string(),
        )),
    }
}

fn from_text<T: Record>(text: &str) -> Result<T> {
    let body = strip_code_fence(text);
    let record = serde_json::from_str::<T>(body)
        .or_else(|first| match outer_span(body, T::SHAPE) {
            Some(span) if span.len() < body.len() => serde_json::from_str::<T>(span),
            _ => Err(first),
        })
        .map_err(|e| PipelineError::malformed(text, e))?;
    validated(record, text)
}

fn validated<T: Record>(record: T, raw: &str) -> Result<T> {
    record
        .check()
        .map_err(|detail| PipelineError::malformed(raw, detail))?;
    Ok(record)
}

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````).
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string on the opening line.
    let Some(newline) = rest.find('\n') else {
        return trimmed;
    };
    let body = &rest[newline + 1..];
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Slice from the first opening delimiter to the last closing one.
fn outer_span(text: &str, shape: Shape) -> Option<&str> {
    let (open, close) = shape.delimiters();
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}
