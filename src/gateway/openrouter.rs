//! OpenRouter adapter for chat completions.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::pricing::chat_cost;
use super::types::*;

/// Trait for chat completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

const PROVIDER: &str = "openrouter";
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum allowed response body (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// Maximum allowed input characters (~125k tokens).
const MAX_INPUT_CHARS: usize = 500_000;

/// Retry hint for provider 429s that carry no header.
const REMOTE_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// OpenRouter API adapter for chat completions.
#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterAdapter {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, None, None)
    }

    /// Create from `OPENROUTER_*` environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;

        let base_url =
            std::env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let referer = std::env::var("OPENROUTER_REFERER").ok();
        let app_title = std::env::var("OPENROUTER_APP_TITLE").ok();

        Self::with_config(api_key, base_url, timeout, referer, app_title)
    }

    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", api_key.into()))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        for (name, value) in [("HTTP-Referer", referer), ("X-Title", app_title)] {
            if let Some(v) = value.and_then(|v| HeaderValue::from_str(&v).ok()) {
                headers.insert(name, v);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Read the body while enforcing the size cap.
    async fn read_body(mut response: reqwest::Response) -> Result<String, ProviderError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    PROVIDER,
                    format!("Response too large: {new_len} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn http_error(status: StatusCode, body: &str, ctx: ErrorContext) -> ProviderError {
        let retryable = status.is_server_error();
        let api_error = serde_json::from_str::<ChatApiResponse>(body)
            .ok()
            .and_then(|parsed| parsed.error);

        let Some(error) = api_error else {
            return ProviderError::provider_with_context(
                PROVIDER,
                format!("HTTP {}", status.as_u16()),
                retryable,
                ctx,
            );
        };

        let ctx = match error.code {
            Some(code) => ctx.with_code(code),
            None => ctx,
        };
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ProviderError::rate_limited(REMOTE_RATE_LIMIT_BACKOFF, ctx);
        }
        ProviderError::provider_with_context(
            PROVIDER,
            error.message.unwrap_or_default(),
            retryable,
            ctx,
        )
    }
}

/// Whether a model reply is a refusal rather than an answer.
fn is_refusal(msg: &str) -> bool {
    let l = msg.trim_start().to_lowercase();
    let first_line = l.lines().next().unwrap_or("");

    const PREFIXES: &[&str] = &[
        "refus",
        "i cannot",
        "i can't",
        "i won't",
        "i will not",
        "i am unable to",
        "i'm unable to",
        "unable to comply",
        "unable to assist",
        "unable to help",
    ];

    PREFIXES.iter().any(|p| first_line.starts_with(p)) || l.contains("request was refused")
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

impl ChoiceMessage {
    /// Message content, or the first non-empty tool call arguments when a model
    /// emits structured output through a tool call instead.
    fn into_text(self) -> String {
        let content = self.content.unwrap_or_default();
        if !content.trim().is_empty() {
            return content;
        }
        self.tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| tc.function.and_then(|f| f.arguments))
            .find(|s| !s.trim().is_empty())
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct ToolCall {
    function: Option<ToolFunction>,
}

#[derive(Deserialize)]
struct ToolFunction {
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    #[serde(default)]
    cost_details: Option<CostDetails>,
}

#[derive(Deserialize)]
struct CostDetails {
    upstream_inference_cost: Option<f64>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let total_chars: usize = req.messages.iter().map(|m| m.content.len()).sum();
        if total_chars > MAX_INPUT_CHARS {
            return Err(ProviderError::invalid_request(format!(
                "Input too large: {total_chars} chars (max {MAX_INPUT_CHARS})"
            )));
        }

        let start = Instant::now();

        let api_req = ChatApiRequest {
            model: req.model.model_id(),
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response = self.client.post(self.chat_url()).json(&api_req).send().await?;

        let status = response.status();
        let mut ctx = ErrorContext::new().with_status(status.as_u16());
        if let Some(id) = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
        {
            ctx = ctx.with_request_id(id);
        }

        let body = Self::read_body(response).await?;

        if !status.is_success() {
            return Err(Self::http_error(status, &body, ctx));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::provider(PROVIDER, format!("Invalid JSON: {e}"), false))?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            if is_refusal(&message) {
                return Err(ProviderError::refused(message));
            }
            return Err(ProviderError::provider(PROVIDER, message, false));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ProviderError::provider(PROVIDER, "No choices in response", false))?;

        let content = choice.message.map(ChoiceMessage::into_text).unwrap_or_default();
        if is_refusal(&content) {
            return Err(ProviderError::refused(content));
        }

        let usage = parsed
            .usage
            .ok_or_else(|| ProviderError::provider(PROVIDER, "Missing usage in response", false))?;
        let input_tokens = usage.prompt_tokens.unwrap_or(0);
        let output_tokens = usage.completion_tokens.unwrap_or(0);
        let upstream_cost_nanodollars = usage
            .cost_details
            .and_then(|d| d.upstream_inference_cost)
            .map(|usd| ((usd * 1_000_000_000.0).round() as i64).max(0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            cost_nanodollars: chat_cost(req.model.model_id(), input_tokens, output_tokens),
            upstream_cost_nanodollars,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}
