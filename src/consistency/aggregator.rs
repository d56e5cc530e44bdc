//! Adjudication over a candidate pool.
//!
//! Candidates are labelled `A`, `B`, ... in pool order, rendered into one
//! prompt, and the model names the letter of the most consistent one. A
//! missing letter falls back to `A`; a letter outside the pool is an error.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::gateway::{Attribution, ChatGateway, ProviderError};
use crate::prompts::{PromptTemplate, DEFAULT_ADJUDICATION_PROMPT};
use crate::structured::{fill, FillError, FillMode, FillOptions, SchemaError};

use super::identifiers::{normalize_letter, IdentifierMap, PoolSizeError, MAX_CANDIDATES};
use super::types::{Adjudication, Candidate, Selection};

const CALLER: &str = "aggregator::adjudicate";

/// Letter assumed when the adjudicator names none.
pub const FALLBACK_LETTER: &str = "A";

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("cannot adjudicate an empty candidate pool")]
    EmptyPool,
    #[error("{count} candidates exceed the {max}-letter identifier space", max = MAX_CANDIDATES)]
    TooManyCandidates { count: usize },
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("invalid adjudicator output: {0}")]
    Schema(#[from] SchemaError),
    #[error("adjudicator chose '{letter}', which names none of the {pool_size} candidates")]
    UnresolvableIdentifier { letter: String, pool_size: usize },
}

impl From<FillError> for AggregateError {
    fn from(err: FillError) -> Self {
        match err {
            FillError::Provider(e) => AggregateError::Provider(e),
            FillError::Schema(e) => AggregateError::Schema(e),
        }
    }
}

impl From<PoolSizeError> for AggregateError {
    fn from(err: PoolSizeError) -> Self {
        match err {
            PoolSizeError::Empty => AggregateError::EmptyPool,
            PoolSizeError::TooMany(count) => AggregateError::TooManyCandidates { count },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdjudicatorSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub template: PromptTemplate,
    pub mode: FillMode,
}

impl Default for AdjudicatorSettings {
    fn default() -> Self {
        Self {
            model: "openai/gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: None,
            template: DEFAULT_ADJUDICATION_PROMPT,
            mode: FillMode::Json,
        }
    }
}

pub struct ConsistencyAggregator {
    gateway: Arc<dyn ChatGateway>,
    settings: AdjudicatorSettings,
}

impl ConsistencyAggregator {
    pub fn new(gateway: Arc<dyn ChatGateway>, settings: AdjudicatorSettings) -> Self {
        Self { gateway, settings }
    }

    pub fn settings(&self) -> &AdjudicatorSettings {
        &self.settings
    }

    pub async fn aggregate(
        &self,
        candidates: &[Candidate],
        problem: &str,
        mode: Option<FillMode>,
    ) -> Result<Selection, AggregateError> {
        self.aggregate_for(candidates, problem, mode, &Attribution::new(CALLER))
            .await
    }

    pub async fn aggregate_for(
        &self,
        candidates: &[Candidate],
        problem: &str,
        mode: Option<FillMode>,
        attribution: &Attribution,
    ) -> Result<Selection, AggregateError> {
        let map = IdentifierMap::for_pool(candidates.len())?;

        let solutions = format_solutions(candidates, &map);
        let prompt = self.settings.template.render_adjudication(problem, &solutions);
        let opts = FillOptions {
            model: self.settings.model.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            mode: mode.unwrap_or(self.settings.mode),
            attribution: attribution.for_caller(CALLER),
        };

        let filled = fill::<Adjudication>(self.gateway.as_ref(), &prompt.user, &opts).await?;
        let selection = resolve_selection(candidates, &map, filled.value)?;
        debug!(
            pool_size = candidates.len(),
            chosen = %selection.label,
            fallback = selection.fallback_used,
            cost_nanos = filled.cost_nanodollars,
            "adjudicated candidate pool"
        );
        Ok(selection)
    }
}

/// Render the pool as `"{letter}: \n{text}\n\n\n"` blocks in pool order.
pub fn format_solutions(candidates: &[Candidate], map: &IdentifierMap) -> String {
    let mut out = String::new();
    for (label, position) in map.iter() {
        if let Some(candidate) = candidates.get(position) {
            let _ = write!(out, "{label}: \n{candidate}\n\n\n");
        }
    }
    out
}

/// Map an adjudication back onto the pool.
pub fn resolve_selection(
    candidates: &[Candidate],
    map: &IdentifierMap,
    adjudication: Adjudication,
) -> Result<Selection, AggregateError> {
    let Adjudication {
        thought,
        solution_letter,
    } = adjudication;

    let fallback_used = solution_letter.is_none();
    let raw = solution_letter.unwrap_or_else(|| FALLBACK_LETTER.to_string());
    if fallback_used {
        warn!(
            pool_size = candidates.len(),
            "adjudicator gave no solution letter; using first candidate"
        );
    }

    let unresolvable = || AggregateError::UnresolvableIdentifier {
        letter: normalize_letter(&raw),
        pool_size: candidates.len(),
    };
    let (label, index) = map.resolve(&raw).ok_or_else(unresolvable)?;
    let candidate = candidates.get(index).cloned().ok_or_else(unresolvable)?;

    Ok(Selection {
        index,
        label,
        candidate,
        thought,
        fallback_used,
    })
}
