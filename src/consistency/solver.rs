//! The driving loop: sample a pool, then adjudicate it once.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{ConfigError, SolverConfig};
use crate::gateway::{Attribution, ChatGateway};
use crate::structured::FillMode;

use super::aggregator::{AdjudicatorSettings, AggregateError, ConsistencyAggregator};
use super::generator::{CandidateGenerator, GenerationError, GeneratorSettings};
use super::identifiers::MAX_CANDIDATES;
use super::types::{Candidate, SolveOutcome};

const CALLER: &str = "solver::solve";

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("samples must be between 1 and {max}, got {0}", max = MAX_CANDIDATES)]
    InvalidSamples(usize),
    #[error("generation {index} failed: {source}")]
    Generation {
        index: usize,
        #[source]
        source: GenerationError,
    },
    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),
}

/// Self-consistency over a [`CandidateGenerator`] and a [`ConsistencyAggregator`].
pub struct SelfConsistency {
    gateway: Arc<dyn ChatGateway>,
    generator: CandidateGenerator,
    aggregator: ConsistencyAggregator,
    samples: usize,
    generation_mode: FillMode,
    adjudication_mode: FillMode,
    parallel_generation: bool,
}

impl SelfConsistency {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        generator: GeneratorSettings,
        adjudicator: AdjudicatorSettings,
        samples: usize,
    ) -> Result<Self, SolveError> {
        if samples == 0 || samples > MAX_CANDIDATES {
            return Err(SolveError::InvalidSamples(samples));
        }
        Ok(Self {
            generator: CandidateGenerator::new(gateway.clone(), generator),
            aggregator: ConsistencyAggregator::new(gateway.clone(), adjudicator),
            gateway,
            samples,
            generation_mode: FillMode::Tagged,
            adjudication_mode: FillMode::Tagged,
            parallel_generation: false,
        })
    }

    pub fn from_config(
        gateway: Arc<dyn ChatGateway>,
        config: &SolverConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let generator = GeneratorSettings {
            model: config.model.clone(),
            temperature: config.generation_temperature,
            max_tokens: config.max_output_tokens,
            template: config.generation_prompt()?,
            mode: config.generation_mode,
        };
        let adjudicator = AdjudicatorSettings {
            model: config.adjudicator_model().to_string(),
            temperature: config.adjudication_temperature,
            max_tokens: config.max_output_tokens,
            template: config.adjudication_prompt()?,
            mode: config.adjudication_mode,
        };
        Ok(Self {
            generator: CandidateGenerator::new(gateway.clone(), generator),
            aggregator: ConsistencyAggregator::new(gateway.clone(), adjudicator),
            gateway,
            samples: config.samples,
            generation_mode: config.generation_mode,
            adjudication_mode: config.adjudication_mode,
            parallel_generation: config.parallel_generation,
        })
    }

    pub fn with_parallel_generation(mut self, parallel: bool) -> Self {
        self.parallel_generation = parallel;
        self
    }

    pub fn with_modes(mut self, generation: FillMode, adjudication: FillMode) -> Self {
        self.generation_mode = generation;
        self.adjudication_mode = adjudication;
        self
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn generator(&self) -> &CandidateGenerator {
        &self.generator
    }

    pub fn aggregator(&self) -> &ConsistencyAggregator {
        &self.aggregator
    }

    /// Cumulative cost reported by the gateway. Read-only; never reset here.
    pub fn session_cost_nanodollars(&self) -> Option<i64> {
        self.gateway.session_cost_nanodollars()
    }

    pub async fn solve(&self, problem: &str) -> Result<SolveOutcome, SolveError> {
        let attribution = Attribution::new(CALLER).with_job(Uuid::new_v4());
        self.solve_attributed(problem, &attribution).await
    }

    pub async fn solve_attributed(
        &self,
        problem: &str,
        attribution: &Attribution,
    ) -> Result<SolveOutcome, SolveError> {
        let candidates = self.sample_pool(problem, attribution).await?;
        debug!(
            samples = candidates.len(),
            parallel = self.parallel_generation,
            "candidate pool complete"
        );

        let selection = self
            .aggregator
            .aggregate_for(&candidates, problem, Some(self.adjudication_mode), attribution)
            .await?;

        let session_cost_nanodollars = self.session_cost_nanodollars();
        info!(
            job_id = ?attribution.job_id,
            chosen = %selection.label,
            fallback = selection.fallback_used,
            session_cost_nanos = ?session_cost_nanodollars,
            "self-consistency solved problem"
        );

        Ok(SolveOutcome {
            answer: selection.candidate.clone(),
            selection,
            candidates,
            session_cost_nanodollars,
        })
    }

    async fn sample_pool(
        &self,
        problem: &str,
        attribution: &Attribution,
    ) -> Result<Vec<Candidate>, SolveError> {
        let mode = Some(self.generation_mode);
        let one = |index: usize| async move {
            self.generator
                .generate_for(problem, mode, attribution)
                .await
                .map_err(|source| SolveError::Generation { index, source })
        };

        if self.parallel_generation {
            return try_join_all((0..self.samples).map(one)).await;
        }

        let mut candidates = Vec::with_capacity(self.samples);
        for index in 0..self.samples {
            candidates.push(one(index).await?);
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatRequest, ChatResponse, ProviderError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Numbers generation replies in call order; adjudication always picks `B`.
    struct Counting {
        generations: AtomicUsize,
        adjudications: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ChatGateway for Counting {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            if req.attribution.caller == "aggregator::adjudicate" {
                self.adjudications.fetch_add(1, Ordering::SeqCst);
                return Ok(ChatResponse::text(
                    "<thought>B agrees</thought><solution_letter>B</solution_letter>",
                ));
            }
            let n = self.generations.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse::text(format!("<solution>Answer is {n}</solution>")))
        }
    }

    fn counting() -> Arc<Counting> {
        Arc::new(Counting {
            generations: AtomicUsize::new(0),
            adjudications: AtomicUsize::new(0),
        })
    }

    #[test]
    fn sample_count_is_bounded() {
        for bad in [0, 27] {
            let err = SelfConsistency::new(
                counting(),
                GeneratorSettings::default(),
                AdjudicatorSettings::default(),
                bad,
            )
            .err()
            .unwrap();
            assert!(matches!(err, SolveError::InvalidSamples(n) if n == bad));
        }
    }

    #[tokio::test]
    async fn sequential_pool_keeps_call_order() {
        let gw = counting();
        let solver = SelfConsistency::from_config(gw.clone(), &SolverConfig::default()).unwrap();
        let out = solver.solve("What is n?").await.unwrap();

        let texts: Vec<&str> = out.candidates.iter().map(Candidate::as_str).collect();
        assert_eq!(
            texts,
            ["Answer is 0", "Answer is 1", "Answer is 2", "Answer is 3", "Answer is 4"]
        );
        assert_eq!(out.answer.as_str(), "Answer is 1");
        assert_eq!(gw.generations.load(Ordering::SeqCst), 5);
        assert_eq!(gw.adjudications.load(Ordering::SeqCst), 1);
        assert_eq!(out.session_cost_nanodollars, None);
    }

    #[tokio::test]
    async fn parallel_pool_has_every_sample() {
        let gw = counting();
        let config = SolverConfig {
            samples: 8,
            parallel_generation: true,
            ..SolverConfig::default()
        };
        let solver = SelfConsistency::from_config(gw.clone(), &config).unwrap();
        let out = solver.solve("What is n?").await.unwrap();
        assert_eq!(out.candidates.len(), 8);
        assert_eq!(gw.adjudications.load(Ordering::SeqCst), 1);
    }

    /// Later-issued generations finish first.
    struct Staggered {
        samples: usize,
        issued: AtomicUsize,
        finished: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl ChatGateway for Staggered {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            if req.attribution.caller == "aggregator::adjudicate" {
                return Ok(ChatResponse::text(
                    "<thought>B agrees</thought><solution_letter>B</solution_letter>",
                ));
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            let delay = (self.samples - n) as u64 * 10;
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            self.finished.lock().unwrap().push(n);
            Ok(ChatResponse::text(format!("<solution>issued {n}</solution>")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_pool_keeps_issuance_order() {
        let gw = Arc::new(Staggered {
            samples: 4,
            issued: AtomicUsize::new(0),
            finished: std::sync::Mutex::new(Vec::new()),
        });
        let config = SolverConfig {
            samples: 4,
            parallel_generation: true,
            ..SolverConfig::default()
        };
        let solver = SelfConsistency::from_config(gw.clone(), &config).unwrap();
        let out = solver.solve("What is n?").await.unwrap();

        assert_eq!(*gw.finished.lock().unwrap(), [3, 2, 1, 0]);
        let texts: Vec<&str> = out.candidates.iter().map(Candidate::as_str).collect();
        assert_eq!(texts, ["issued 0", "issued 1", "issued 2", "issued 3"]);
        assert_eq!(out.selection.index, 1);
        assert_eq!(out.answer.as_str(), "issued 1");
    }

    #[tokio::test]
    async fn generation_failure_reports_index_and_skips_adjudication() {
        let gw = counting();
        let solver = SelfConsistency::from_config(gw.clone(), &SolverConfig::default()).unwrap();
        let err = solver.solve("   ").await.unwrap_err();
        assert!(matches!(
            err,
            SolveError::Generation {
                index: 0,
                source: GenerationError::EmptyProblem
            }
        ));
        assert_eq!(gw.adjudications.load(Ordering::SeqCst), 0);
    }
}
