#![forbid(unsafe_code)]

//! # consistency-harness
//!
//! Self-consistency answer aggregation for arithmetic word problems.
//!
//! A problem is solved several times at a sampling temperature, each candidate
//! is given a letter (`A`, `B`, ...), and a second model call picks the letter
//! of the candidate whose final answer is most common across the pool. The
//! chosen candidate is the answer.
//!
//! The model is reached only through [`ChatGateway`], so every component can be
//! driven by a stub in tests. Cost is accounted by the gateway's [`UsageSink`]
//! and read back through [`ChatGateway::session_cost_nanodollars`].

pub mod config;
pub mod consistency;
pub mod evaluation;
pub mod gateway;
pub mod prompts;
pub mod structured;

pub use config::{ConfigError, SolverConfig};
pub use consistency::{
    AggregateError, Candidate, CandidateGenerator, ConsistencyAggregator, GenerationError,
    IdentifierMap, Label, SelfConsistency, Selection, SolveError, SolveOutcome,
};
pub use gateway::{Attribution, ChatGateway, CostLedger, ProviderGateway, UsageSink};
pub use structured::{FillMode, StructuredOutput};
