//! Core types for the provider gateway.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution for cost tracking and debugging.
///
/// Every request through the gateway carries attribution so usage records can
/// be grouped by evaluation run (`job_id`) and by the code path that issued
/// the call (`caller`, e.g. "generator::solution" or "aggregator::adjudicate").
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    /// Evaluation run or batch this request belongs to.
    pub job_id: Option<Uuid>,
    /// Which code path made this call, for debugging.
    pub caller: &'static str,
}

impl Attribution {
    pub fn new(caller: &'static str) -> Self {
        Self {
            caller,
            ..Default::default()
        }
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Same job, different call site.
    pub fn for_caller(&self, caller: &'static str) -> Self {
        Self {
            job_id: self.job_id,
            caller,
        }
    }
}

// =============================================================================
// CHAT TYPES
// =============================================================================

/// Chat message role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// A chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Prompts are sent as a single user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Model routed through a provider.
#[derive(Debug, Clone)]
pub enum ChatModel {
    /// OpenRouter model, e.g. "openai/gpt-4o-mini"
    OpenRouter(String),
}

impl ChatModel {
    pub fn openrouter(model_id: impl Into<String>) -> Self {
        ChatModel::OpenRouter(model_id.into())
    }

    pub fn model_id(&self) -> &str {
        match self {
            ChatModel::OpenRouter(id) => id,
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            ChatModel::OpenRouter(_) => "openrouter",
        }
    }

    /// Whether `response_format=json_object` is honored for this model via OpenRouter.
    pub fn supports_json_mode(&self) -> bool {
        self.model_id().starts_with("openai/")
    }
}

/// Request for chat completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model to use.
    pub model: ChatModel,
    /// Messages in the conversation.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Whether to request JSON output.
    pub json_mode: bool,
    /// Attribution for cost tracking.
    pub attribution: Attribution,
}

impl ChatRequest {
    pub fn new(model: ChatModel, messages: Vec<Message>, attribution: Attribution) -> Self {
        Self {
            model,
            messages,
            temperature: 0.0,
            max_tokens: None,
            json_mode: false,
            attribution,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Unknown(String),
}

impl From<Option<String>> for FinishReason {
    fn from(s: Option<String>) -> Self {
        match s.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some("tool_calls") => FinishReason::ToolCalls,
            Some(other) => FinishReason::Unknown(other.to_string()),
            None => FinishReason::Unknown("none".to_string()),
        }
    }
}

/// Response from chat completion.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated content.
    pub content: String,
    /// Input tokens consumed.
    pub input_tokens: u32,
    /// Output tokens generated.
    pub output_tokens: u32,
    /// Cost in nanodollars.
    pub cost_nanodollars: i64,
    /// Provider-reported upstream inference cost (nanodollars), if available.
    ///
    /// For OpenRouter this is derived from `usage.cost_details.upstream_inference_cost`.
    pub upstream_cost_nanodollars: Option<i64>,
    /// Time taken for the request.
    pub latency: Duration,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}

impl ChatResponse {
    /// A plain successful response, used by in-process gateways and tests.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            upstream_cost_nanodollars: None,
            latency: Duration::from_millis(0),
            finish_reason: FinishReason::Stop,
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            finish_reason: FinishReason::Unknown("error".to_string()),
            ..Self::text(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_defaults() {
        let req = ChatRequest::new(
            ChatModel::openrouter("test/model"),
            vec![Message::user("hi")],
            Attribution::new("test"),
        );

        assert_eq!(req.temperature, 0.0);
        assert!(req.max_tokens.is_none());
        assert!(!req.json_mode);
    }

    #[test]
    fn json_mode_only_for_openai_routes() {
        assert!(ChatModel::openrouter("openai/gpt-4o-mini").supports_json_mode());
        assert!(!ChatModel::openrouter("deepseek/deepseek-chat").supports_json_mode());
    }

    #[test]
    fn attribution_for_caller_keeps_job() {
        let job = Uuid::new_v4();
        let base = Attribution::new("solver").with_job(job);
        let derived = base.for_caller("aggregator::adjudicate");
        assert_eq!(derived.job_id, Some(job));
        assert_eq!(derived.caller, "aggregator::adjudicate");
    }

    #[test]
    fn finish_reason_from_provider_string() {
        assert_eq!(FinishReason::from(Some("stop".to_string())), FinishReason::Stop);
        assert_eq!(
            FinishReason::from(None),
            FinishReason::Unknown("none".to_string())
        );
    }
}
