//! Prompt templates for candidate generation and adjudication.
//!
//! Template bodies are reproduced exactly; small wording changes measurably
//! shift model behavior, so every rendered prompt can be traced back to a slug
//! and a content hash.

use crate::gateway::Message;

/// Which step of the pipeline a template feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateRole {
    Generation,
    Adjudication,
}

/// A prompt template with `{placeholder}` slots.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub role: TemplateRole,
    pub body: &'static str,
}

/// Rendered prompt ready for the gateway.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: &'static str,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::user(&self.user)]
    }
}

impl PromptTemplate {
    /// Substitute `{question}` only.
    pub fn render_question(&self, question: &str) -> PromptInstance {
        PromptInstance {
            template_slug: self.slug,
            user: self.body.replace("{question}", question),
        }
    }

    /// Substitute `{question}` and `{solutions}`.
    ///
    /// `{solutions}` is filled first so a problem statement containing the
    /// literal text "{solutions}" is never expanded.
    pub fn render_adjudication(&self, question: &str, solutions: &str) -> PromptInstance {
        let (head, tail) = match self.body.split_once("{solutions}") {
            Some((head, tail)) => (head, Some(tail)),
            None => (self.body, None),
        };
        let mut user = head.replace("{question}", question);
        if let Some(tail) = tail {
            user.push_str(solutions);
            user.push_str(&tail.replace("{question}", question));
        }
        PromptInstance {
            template_slug: self.slug,
            user,
        }
    }

    /// blake3 hex digest of the template body.
    pub fn content_hash(&self) -> String {
        blake3::hash(self.body.as_bytes()).to_hex().to_string()
    }
}

// =============================================================================
// Standard prompts
// =============================================================================

pub const GENERATE_ANSWER_IS_V1: PromptTemplate = PromptTemplate {
    slug: "answer_is_v1",
    role: TemplateRole::Generation,
    body: "\n{question}\nPlease reason step by step. At the end, provide the final answer in the format \"Answer is <number>\", where <number> is a single number, without any additional information or explanation.\n",
};

pub const GENERATE_BOXED_V1: PromptTemplate = PromptTemplate {
    slug: "boxed_v1",
    role: TemplateRole::Generation,
    body: "\n{question}\nPlease reason step by step, and put your final answer within \\boxed{}.\n",
};

pub const SC_ENSEMBLE_V1: PromptTemplate = PromptTemplate {
    slug: "sc_ensemble_v1",
    role: TemplateRole::Adjudication,
    body: r#"
Given the question described as follows: {question}
Several solutions have been generated to address the given question. They are as follows:
{solutions}

Carefully evaluate these solutions and identify the answer that appears most frequently across them. This consistency in answers is crucial for determining the most reliable solution.

In the "thought" field, provide a detailed explanation of your thought process. In the "solution_letter" field, output only the single letter ID (A, B, C, etc.) corresponding to the most consistent solution. Do not include any additional text or explanation in the "solution_letter" field.
"#,
};

pub const PROMPTS: &[PromptTemplate] = &[GENERATE_ANSWER_IS_V1, GENERATE_BOXED_V1, SC_ENSEMBLE_V1];
pub const DEFAULT_GENERATION_PROMPT: PromptTemplate = GENERATE_ANSWER_IS_V1;
pub const DEFAULT_ADJUDICATION_PROMPT: PromptTemplate = SC_ENSEMBLE_V1;

pub fn prompt_by_slug(slug: &str) -> Option<PromptTemplate> {
    PROMPTS.iter().find(|t| t.slug == slug).copied()
}

/// Look up a template by slug, only if it serves the given role.
pub fn prompt_for_role(slug: &str, role: TemplateRole) -> Option<PromptTemplate> {
    prompt_by_slug(slug).filter(|t| t.role == role)
}
