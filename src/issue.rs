//! Issue synthesis.
//!
//! One model call turns an answer text into an [`IssueRecord`] through the
//! coercer. With `use_tools` the question is first grounded by the agent;
//! a grounding failure downgrades to the raw question instead of failing
//! the request.

use std::sync::Arc;
use tracing::{info, warn};

use crate::agent::QuestionAnswerer;
use crate::coerce::coerce;
use crate::config::SamplingConfig;
use crate::error::{PipelineError, Result};
use crate::llm::LanguageModel;
use crate::models::IssueRecord;
use crate::prompts::issue_prompt;

pub struct IssueStage {
    model: Arc<dyn LanguageModel>,
    answerer: Option<Arc<dyn QuestionAnswerer>>,
    sampling: SamplingConfig,
}

impl IssueStage {
    pub fn new(model: Arc<dyn LanguageModel>, sampling: SamplingConfig) -> Self {
        Self {
            model,
            answerer: None,
            sampling,
        }
    }

    /// Grounding step used when a request sets `use_tools`.
    pub fn with_answerer(mut self, answerer: Arc<dyn QuestionAnswerer>) -> Self {
        self.answerer = Some(answerer);
        self
    }

    pub async fn build_issue(&self, answer_text: &str) -> Result<IssueRecord> {
        let output = self
            .model
            .complete(&issue_prompt(answer_text), self.sampling)
            .await
            .map_err(|e| PipelineError::upstream("language model", e))?;
        coerce(output)
    }

    #[tracing::instrument(name = "issue.create", skip(self))]
    pub async fn create_issue(&self, question: &str, use_tools: bool) -> Result<IssueRecord> {
        let answer = if use_tools {
            self.ground(question).await
        } else {
            question.to_string()
        };
        let issue = self.build_issue(&answer).await?;
        info!(target: "issue", severity = %issue.severity, title = %issue.title, "issue built");
        Ok(issue)
    }

    async fn ground(&self, question: &str) -> String {
        let Some(answerer) = &self.answerer else {
            warn!(target: "issue", "use_tools requested but no agent configured; using question");
            return question.to_string();
        };
        match answerer.answer(question).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(target: "issue", error = %e, "grounding failed; using question");
                question.to_string()
            }
        }
    }
}
