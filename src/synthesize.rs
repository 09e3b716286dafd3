//! Grounded answer synthesis.
//!
//! One model call per question, with a prompt that restricts the answer to
//! the supplied context and names the exact phrase to use when the context
//! does not contain the answer. No retry at this layer.

use std::sync::Arc;

use crate::config::SamplingConfig;
use crate::error::{PipelineError, Result};
use crate::llm::{LanguageModel, ModelOutput};
use crate::prompts::synthesis_prompt;

pub struct GroundedSynthesizer {
    model: Arc<dyn LanguageModel>,
    sampling: SamplingConfig,
}

impl GroundedSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, sampling: SamplingConfig) -> Self {
        Self { model, sampling }
    }

    pub async fn synthesize(&self, context: &str, question: &str) -> Result<String> {
        let prompt = synthesis_prompt(context, question);
        let output = self
            .model
            .complete(&prompt, self.sampling)
            .await
            .map_err(|e| PipelineError::upstream("language model", e))?;
        Ok(output_text(output))
    }
}

/// Plain-text view of a model reply, as a string output parser would give it.
pub(crate) fn output_text(output: ModelOutput) -> String {
    match output {
        ModelOutput::Text(s) => s,
        ModelOutput::Message(m) => m.content.unwrap_or_default(),
        ModelOutput::Structured(serde_json::Value::String(s)) => s,
        ModelOutput::Structured(v) => v.to_string(),
    }
}
