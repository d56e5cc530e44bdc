//! Provider gateway: the text-generation capability the solver is built on.

pub mod error;
pub mod openrouter;
pub mod pricing;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use openrouter::{ChatProvider, OpenRouterAdapter};
use usage::{CallStatus, ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use pricing::*;
pub use types::*;
pub use usage::{CostLedger, NoopUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Cumulative cost of every call made through this gateway, if tracked.
    fn session_cost_nanodollars(&self) -> Option<i64> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Cap on a provider-requested `retry_after` wait.
    pub max_retry_after: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
            max_retry_after: Duration::from_secs(30),
        }
    }
}

/// Retrying gateway over a chat provider, reporting every attempt to a usage sink.
pub struct ProviderGateway<U: UsageSinkTrait, P: ChatProvider = OpenRouterAdapter> {
    provider: P,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait, P: ChatProvider> ChatGateway for ProviderGateway<U, P> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }

    fn session_cost_nanodollars(&self) -> Option<i64> {
        self.usage_sink.total_cost_nanodollars()
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U, OpenRouterAdapter> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        Ok(Self::with_config(
            OpenRouterAdapter::from_env()?,
            usage_sink,
            GatewayConfig::default(),
        ))
    }
}

impl<U: UsageSinkTrait, P: ChatProvider> ProviderGateway<U, P> {
    pub fn with_config(provider: P, usage_sink: Arc<U>, config: GatewayConfig) -> Self {
        Self {
            provider,
            usage_sink,
            config,
        }
    }

    pub fn usage_sink(&self) -> &Arc<U> {
        &self.usage_sink
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            match self.provider.chat(&req).await {
                Ok(resp) => {
                    debug!(
                        model = req.model.model_id(),
                        caller = req.attribution.caller,
                        input_tokens = resp.input_tokens,
                        output_tokens = resp.output_tokens,
                        latency_ms = resp.latency.as_millis() as u64,
                        "chat completion succeeded"
                    );
                    self.record_usage(&req, &resp, CallStatus::Success, None)
                        .await;
                    return Ok(resp);
                }
                Err(err) => {
                    let code = err.code().to_string();
                    self.record_usage(&req, &ChatResponse::empty(), CallStatus::Error, Some(code))
                        .await;

                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    let requested = err
                        .retry_after()
                        .map(|d| d.min(self.config.max_retry_after))
                        .unwrap_or_default();
                    let delay = backoff_delay(self.config.retry_base_delay, attempt).max(requested);
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retryable provider error; backing off"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::provider("gateway", "unknown error", false)))
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        resp: &ChatResponse,
        status: CallStatus,
        error_code: Option<String>,
    ) {
        let record = ProviderCallRecord::new(
            req.model.provider(),
            "chat/completions",
            req.model.model_id(),
            req.attribution.caller,
        )
        .tokens(resp.input_tokens as i32, resp.output_tokens as i32)
        .cost(resp.cost_nanodollars)
        .upstream_cost(resp.upstream_cost_nanodollars)
        .job(req.attribution.job_id)
        .latency(resp.latency.as_millis() as i32);

        let record = if status == CallStatus::Error {
            record.error(error_code.unwrap_or_else(|| "provider_error".to_string()))
        } else {
            record
        };

        self.usage_sink.record(record).await;
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}
