//! Candidate generation: one free-text solution per call.

use std::sync::Arc;

use tracing::debug;

use crate::gateway::{Attribution, ChatGateway, ProviderError};
use crate::prompts::{PromptTemplate, DEFAULT_GENERATION_PROMPT};
use crate::structured::{fill, FillError, FillMode, FillOptions, SchemaError};

use super::types::{Candidate, GeneratedSolution};

const CALLER: &str = "generator::solution";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("problem text is empty")]
    EmptyProblem,
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("invalid generator output: {0}")]
    Schema(#[from] SchemaError),
}

impl From<FillError> for GenerationError {
    fn from(err: FillError) -> Self {
        match err {
            FillError::Provider(e) => GenerationError::Provider(e),
            FillError::Schema(e) => GenerationError::Schema(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub template: PromptTemplate,
    /// Used when a call does not override the mode.
    pub mode: FillMode,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: None,
            template: DEFAULT_GENERATION_PROMPT,
            mode: FillMode::Json,
        }
    }
}

pub struct CandidateGenerator {
    gateway: Arc<dyn ChatGateway>,
    settings: GeneratorSettings,
}

impl CandidateGenerator {
    pub fn new(gateway: Arc<dyn ChatGateway>, settings: GeneratorSettings) -> Self {
        Self { gateway, settings }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    pub async fn generate(
        &self,
        problem: &str,
        mode: Option<FillMode>,
    ) -> Result<Candidate, GenerationError> {
        self.generate_for(problem, mode, &Attribution::new(CALLER))
            .await
    }

    /// Like [`generate`](Self::generate), tagging the call with the caller's job.
    pub async fn generate_for(
        &self,
        problem: &str,
        mode: Option<FillMode>,
        attribution: &Attribution,
    ) -> Result<Candidate, GenerationError> {
        if problem.trim().is_empty() {
            return Err(GenerationError::EmptyProblem);
        }

        let prompt = self.settings.template.render_question(problem);
        let opts = FillOptions {
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            mode: mode.unwrap_or(self.settings.mode),
            attribution: attribution.for_caller(CALLER),
        };

        let filled = fill::<GeneratedSolution>(self.gateway.as_ref(), &prompt.user, &opts).await?;
        debug!(
            template = prompt.template_slug,
            output_tokens = filled.output_tokens,
            cost_nanos = filled.cost_nanodollars,
            "generated candidate"
        );
        Ok(Candidate::new(filled.value.solution))
    }
}
