//! Solver configuration.
//!
//! Every field has a serde default, so `{}` is a valid config file and
//! partial files only override what they name.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consistency::MAX_CANDIDATES;
use crate::prompts::{prompt_for_role, PromptTemplate, TemplateRole};
use crate::structured::FillMode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("samples must be between 1 and {max}, got {0}", max = MAX_CANDIDATES)]
    Samples(usize),
    #[error("temperature {name} = {value} is outside 0.0..=2.0")]
    Temperature { name: &'static str, value: f32 },
    #[error("unknown {role} template '{slug}'")]
    UnknownTemplate { role: &'static str, slug: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SolverConfig {
    /// Model for candidate generation (default: openai/gpt-4o-mini).
    #[serde(default = "default_model")]
    pub model: String,
    /// Model for adjudication; falls back to `model`.
    #[serde(default)]
    pub adjudicator_model: Option<String>,
    /// Candidates generated per problem (default: 5).
    #[serde(default = "default_samples")]
    pub samples: usize,
    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,
    #[serde(default)]
    pub adjudication_temperature: f32,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default = "default_generation_template")]
    pub generation_template: String,
    #[serde(default = "default_adjudication_template")]
    pub adjudication_template: String,
    #[serde(default = "default_fill_mode")]
    pub generation_mode: FillMode,
    #[serde(default = "default_fill_mode")]
    pub adjudication_mode: FillMode,
    /// Issue the generation calls for one problem concurrently.
    #[serde(default)]
    pub parallel_generation: bool,
}

fn default_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

fn default_samples() -> usize {
    5
}

fn default_generation_temperature() -> f32 {
    0.7
}

fn default_generation_template() -> String {
    "answer_is_v1".to_string()
}

fn default_adjudication_template() -> String {
    "sc_ensemble_v1".to_string()
}

fn default_fill_mode() -> FillMode {
    FillMode::Tagged
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            adjudicator_model: None,
            samples: default_samples(),
            generation_temperature: default_generation_temperature(),
            adjudication_temperature: 0.0,
            max_output_tokens: None,
            generation_template: default_generation_template(),
            adjudication_template: default_adjudication_template(),
            generation_mode: default_fill_mode(),
            adjudication_mode: default_fill_mode(),
            parallel_generation: false,
        }
    }
}

impl SolverConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: SolverConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.samples == 0 || self.samples > MAX_CANDIDATES {
            return Err(ConfigError::Samples(self.samples));
        }
        for (name, value) in [
            ("generation_temperature", self.generation_temperature),
            ("adjudication_temperature", self.adjudication_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(ConfigError::Temperature { name, value });
            }
        }
        self.generation_prompt()?;
        self.adjudication_prompt()?;
        Ok(())
    }

    pub fn adjudicator_model(&self) -> &str {
        self.adjudicator_model.as_deref().unwrap_or(&self.model)
    }

    pub fn generation_prompt(&self) -> Result<PromptTemplate, ConfigError> {
        prompt_for_role(&self.generation_template, TemplateRole::Generation).ok_or_else(|| {
            ConfigError::UnknownTemplate {
                role: "generation",
                slug: self.generation_template.clone(),
            }
        })
    }

    pub fn adjudication_prompt(&self) -> Result<PromptTemplate, ConfigError> {
        prompt_for_role(&self.adjudication_template, TemplateRole::Adjudication).ok_or_else(|| {
            ConfigError::UnknownTemplate {
                role: "adjudication",
                slug: self.adjudication_template.clone(),
            }
        })
    }
}
