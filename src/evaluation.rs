//! GSM8K-style evaluation harness.
//!
//! Loads `{question, answer}` JSONL records, runs each problem through
//! [`SelfConsistency`], and scores the chosen candidate by comparing its
//! trailing number with the trailing number of the reference answer.
//! A failed problem is recorded and scored wrong; the run continues.

use std::io::Write;
use std::path::Path;

use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::consistency::{Label, SelfConsistency};
use crate::gateway::{nanodollars_to_usd, Attribution};

/// Matches signed integers and decimals. Commas between digits are kept in
/// the match and stripped before parsing.
static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[-+]?\d+(?:,\d+)*(?:\.\d+)?").expect("Invalid number regex")
});

/// Absolute tolerance when comparing predicted and expected answers.
pub const ANSWER_TOLERANCE: f64 = 1e-6;

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: invalid problem record: {source}")]
    Record {
        path: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}

// =============================================================================
// Dataset
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MathProblem {
    pub question: String,
    /// Reference solution; its trailing number is the expected answer.
    pub answer: String,
}

impl MathProblem {
    pub fn expected(&self) -> Option<f64> {
        extract_number(&self.answer)
    }
}

/// Load problems from a JSONL file.
///
/// With a seed the records are shuffled before `limit` is applied, so the
/// same seed always yields the same subset.
pub fn load_problems(
    path: &Path,
    limit: Option<usize>,
    shuffle_seed: Option<u64>,
) -> Result<Vec<MathProblem>, EvaluationError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| EvaluationError::Io {
        path: display.clone(),
        source,
    })?;

    let mut problems = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let problem: MathProblem =
            serde_json::from_str(line).map_err(|source| EvaluationError::Record {
                path: display.clone(),
                line: i + 1,
                source,
            })?;
        problems.push(problem);
    }

    if let Some(seed) = shuffle_seed {
        problems.shuffle(&mut StdRng::seed_from_u64(seed));
    }
    if let Some(limit) = limit {
        problems.truncate(limit);
    }
    Ok(problems)
}

// =============================================================================
// Scoring
// =============================================================================

/// The last number in `text`, with digit-separating commas removed.
pub fn extract_number(text: &str) -> Option<f64> {
    let last = NUMBER.find_iter(text).last()?;
    last.as_str().replace(',', "").parse().ok()
}

pub fn answers_match(expected: f64, predicted: f64) -> bool {
    (expected - predicted).abs() <= ANSWER_TOLERANCE
}

/// One line of the results file.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemResult {
    pub index: usize,
    pub question: String,
    pub expected: Option<f64>,
    pub predicted: Option<f64>,
    pub correct: bool,
    pub chosen: Option<Label>,
    pub fallback_used: bool,
    pub answer: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSummary {
    pub run_id: Uuid,
    pub total: usize,
    pub correct: usize,
    pub failed: usize,
    pub fallbacks: usize,
    pub accuracy: f64,
    pub session_cost_nanodollars: Option<i64>,
    pub session_cost_usd: Option<f64>,
    pub generation_template: &'static str,
    pub generation_template_hash: String,
    pub adjudication_template: &'static str,
    pub adjudication_template_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub summary: EvaluationSummary,
    pub results: Vec<ProblemResult>,
}

// =============================================================================
// Run
// =============================================================================

/// Solve every problem with up to `parallelism` in flight.
///
/// Results come back in dataset order regardless of completion order.
pub async fn evaluate(
    solver: &SelfConsistency,
    problems: &[MathProblem],
    parallelism: usize,
) -> EvaluationReport {
    let run_id = Uuid::new_v4();
    let attribution = Attribution::new("evaluation::problem").with_job(run_id);
    info!(%run_id, problems = problems.len(), parallelism, "starting evaluation");

    let mut results: Vec<ProblemResult> = stream::iter(problems.iter().enumerate())
        .map(|(index, problem)| {
            let attribution = &attribution;
            async move { score_problem(solver, index, problem, attribution).await }
        })
        .buffer_unordered(parallelism.max(1))
        .collect()
        .await;
    results.sort_by_key(|r| r.index);

    let total = results.len();
    let correct = results.iter().filter(|r| r.correct).count();
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    let fallbacks = results.iter().filter(|r| r.fallback_used).count();
    let accuracy = if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    };

    let session_cost_nanodollars = solver.session_cost_nanodollars();
    let generation = solver.generator().settings().template;
    let adjudication = solver.aggregator().settings().template;
    let summary = EvaluationSummary {
        run_id,
        total,
        correct,
        failed,
        fallbacks,
        accuracy,
        session_cost_nanodollars,
        session_cost_usd: session_cost_nanodollars.map(nanodollars_to_usd),
        generation_template: generation.slug,
        generation_template_hash: generation.content_hash(),
        adjudication_template: adjudication.slug,
        adjudication_template_hash: adjudication.content_hash(),
    };
    info!(
        %run_id,
        total,
        correct,
        failed,
        accuracy,
        cost_nanos = ?session_cost_nanodollars,
        "evaluation finished"
    );

    EvaluationReport { summary, results }
}

async fn score_problem(
    solver: &SelfConsistency,
    index: usize,
    problem: &MathProblem,
    attribution: &Attribution,
) -> ProblemResult {
    let expected = problem.expected();
    let mut result = ProblemResult {
        index,
        question: problem.question.clone(),
        expected,
        predicted: None,
        correct: false,
        chosen: None,
        fallback_used: false,
        answer: None,
        error: None,
    };

    match solver.solve_attributed(&problem.question, attribution).await {
        Ok(outcome) => {
            let predicted = extract_number(outcome.answer.as_str());
            result.predicted = predicted;
            result.correct = matches!(
                (expected, predicted),
                (Some(e), Some(p)) if answers_match(e, p)
            );
            result.chosen = Some(outcome.selection.label);
            result.fallback_used = outcome.selection.fallback_used;
            result.answer = Some(outcome.answer.into_inner());
        }
        Err(err) => {
            warn!(index, error = %err, "problem failed");
            result.error = Some(err.to_string());
        }
    }
    result
}

/// Write one JSON object per problem.
pub fn write_results_jsonl(path: &Path, results: &[ProblemResult]) -> Result<(), EvaluationError> {
    let io_err = |source| EvaluationError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = std::fs::File::create(path).map_err(io_err)?;
    let mut out = std::io::BufWriter::new(file);
    for result in results {
        serde_json::to_writer(&mut out, result)?;
        out.write_all(b"\n").map_err(io_err)?;
    }
    out.flush().map_err(io_err)?;
    Ok(())
}
