//! CRM message template generation.

use std::sync::Arc;
use tracing::debug;

use crate::coerce::coerce;
use crate::config::SamplingConfig;
use crate::error::{PipelineError, Result};
use crate::llm::LanguageModel;
use crate::models::{TemplateMessage, TemplateRequest};
use crate::prompts::template_prompt;

pub struct TemplateStage {
    model: Arc<dyn LanguageModel>,
    sampling: SamplingConfig,
}

impl TemplateStage {
    pub fn new(model: Arc<dyn LanguageModel>, sampling: SamplingConfig) -> Self {
        Self { model, sampling }
    }

    /// Three short Korean messages with rationale.
    #[tracing::instrument(name = "templates.generate", skip_all, fields(funnel = %request.funnel_stage))]
    pub async fn generate(&self, request: &TemplateRequest) -> Result<Vec<TemplateMessage>> {
        let output = self
            .model
            .complete(&template_prompt(request), self.sampling)
            .await
            .map_err(|e| PipelineError::upstream("language model", e))?;
        let messages: Vec<TemplateMessage> = coerce(output)?;
        debug!(target: "templates", count = messages.len(), "templates generated");
        Ok(messages)
    }
}
