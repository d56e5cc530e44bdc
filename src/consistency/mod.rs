//! Self-consistency answer aggregation.
//!
//! - `generator`: one candidate solution per model call
//! - `aggregator`: letter-labelled adjudication over a candidate pool
//! - `solver`: samples a pool, then adjudicates it once

pub mod aggregator;
pub mod generator;
pub mod identifiers;
pub mod solver;
pub mod types;

pub use aggregator::{
    format_solutions, resolve_selection, AdjudicatorSettings, AggregateError,
    ConsistencyAggregator, FALLBACK_LETTER,
};
pub use generator::{CandidateGenerator, GenerationError, GeneratorSettings};
pub use identifiers::{normalize_letter, IdentifierMap, Label, PoolSizeError, LABELS, MAX_CANDIDATES};
pub use solver::{SelfConsistency, SolveError};
pub use types::*;
