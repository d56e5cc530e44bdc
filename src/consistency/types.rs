//! Data types shared by the generator, aggregator and solver.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::structured::{FieldSpec, FieldValues, SchemaError, StructuredOutput};

use super::identifiers::Label;

// =============================================================================
// Candidate
// =============================================================================

/// One generated solution: a full reasoning trace ending in a final answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(String);

impl Candidate {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Candidate {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for Candidate {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

// =============================================================================
// Model output schemas
// =============================================================================

/// Generator reply: the solution text, required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSolution {
    pub solution: String,
}

impl StructuredOutput for GeneratedSolution {
    const SCHEMA: &'static str = "generate";
    const FIELDS: &'static [FieldSpec] = &[FieldSpec {
        name: "solution",
        description: "solution for the problem",
    }];

    fn from_fields(mut fields: FieldValues) -> Result<Self, SchemaError> {
        Ok(Self {
            solution: fields.require(Self::SCHEMA, "solution")?,
        })
    }
}

/// Adjudicator reply. `solution_letter` is `None` when the model omitted it
/// or left it blank; the aggregator decides what that means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjudication {
    pub thought: String,
    pub solution_letter: Option<String>,
}

impl StructuredOutput for Adjudication {
    const SCHEMA: &'static str = "sc_ensemble";
    const FIELDS: &'static [FieldSpec] = &[
        FieldSpec {
            name: "thought",
            description: "The thought of the most consistent solution.",
        },
        FieldSpec {
            name: "solution_letter",
            description: "The letter of most consistent solution.",
        },
    ];

    fn from_fields(mut fields: FieldValues) -> Result<Self, SchemaError> {
        Ok(Self {
            thought: fields.take("thought").unwrap_or_default(),
            solution_letter: fields.take("solution_letter"),
        })
    }
}

// =============================================================================
// Results
// =============================================================================

/// The candidate the adjudicator picked, resolved back into the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    /// Zero-based pool position.
    pub index: usize,
    pub label: Label,
    pub candidate: Candidate,
    /// Adjudicator rationale; empty when the model gave none.
    pub thought: String,
    /// True when the letter was missing and the first candidate was chosen.
    pub fallback_used: bool,
}

impl Selection {
    pub fn into_candidate(self) -> Candidate {
        self.candidate
    }
}

/// Everything one self-consistency run produced for a problem.
#[derive(Debug, Clone, Serialize)]
pub struct SolveOutcome {
    pub answer: Candidate,
    pub selection: Selection,
    /// Pool in generation order.
    pub candidates: Vec<Candidate>,
    /// Session-wide cost reported by the gateway after this run.
    pub session_cost_nanodollars: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> FieldValues {
        let mut v = FieldValues::new();
        for (k, val) in pairs {
            v.insert(*k, *val);
        }
        v
    }

    #[test]
    fn generated_solution_requires_text() {
        let ok = GeneratedSolution::from_fields(fields(&[("solution", "Answer is 3")])).unwrap();
        assert_eq!(ok.solution, "Answer is 3");

        let err = GeneratedSolution::from_fields(fields(&[])).unwrap_err();
        assert!(matches!(err, SchemaError::MissingField { field: "solution", .. }));
    }

    #[test]
    fn adjudication_tolerates_missing_fields() {
        let a = Adjudication::from_fields(fields(&[("thought", "30 appears 4 times")])).unwrap();
        assert_eq!(a.thought, "30 appears 4 times");
        assert_eq!(a.solution_letter, None);

        let blank = Adjudication::from_fields(fields(&[("solution_letter", "  ")])).unwrap();
        assert_eq!(blank.solution_letter, None);
    }

    #[test]
    fn candidate_serializes_as_plain_string() {
        let c = Candidate::new("Answer is 30");
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"Answer is 30\"");
        assert_eq!(c.to_string(), "Answer is 30");
    }
}
