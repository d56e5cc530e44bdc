//! Usage tracking via the UsageSink trait.
//!
//! The gateway reports every call through a UsageSink. This decouples the
//! gateway from wherever cost is accounted:
//! - Evaluation runs use `CostLedger` (running session total)
//! - Tests use `NoopUsageSink` or `CostLedger`

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::pricing::nanodollars_to_usd;

/// Status of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of a provider API call.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    /// Provider name, e.g. "openrouter".
    pub provider: &'static str,
    /// Endpoint, e.g. "chat/completions".
    pub endpoint: &'static str,
    /// Model used.
    pub model: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    /// Cost in nanodollars (1e-9 USD).
    pub cost_nanodollars: i64,
    /// Provider-reported upstream inference cost in nanodollars, if available.
    pub upstream_cost_nanodollars: Option<i64>,
    /// Evaluation run this request is part of (if any).
    pub job_id: Option<Uuid>,
    pub latency_ms: i32,
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<String>,
    /// Which code path made this call.
    pub caller: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    /// Create a new record with required fields, defaulting others.
    pub fn new(
        provider: &'static str,
        endpoint: &'static str,
        model: impl Into<String>,
        caller: &'static str,
    ) -> Self {
        Self {
            provider,
            endpoint,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost_nanodollars: 0,
            upstream_cost_nanodollars: None,
            job_id: None,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, input: i32, output: i32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn cost(mut self, nanodollars: i64) -> Self {
        self.cost_nanodollars = nanodollars;
        self
    }

    pub fn upstream_cost(mut self, nanodollars: Option<i64>) -> Self {
        self.upstream_cost_nanodollars = nanodollars;
        self
    }

    pub fn job(mut self, job_id: Option<Uuid>) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn latency(mut self, ms: i32) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }
}

/// Trait for recording provider call usage.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a provider call. Fire-and-forget: failures are not propagated.
    async fn record(&self, record: ProviderCallRecord);

    /// Running total cost of the session this sink accounts for, if it keeps one.
    fn total_cost_nanodollars(&self) -> Option<i64> {
        None
    }
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Running cost total for one model-call session.
///
/// Shared between the gateway (which records into it) and whoever reports
/// cost (which reads it). Never reset by readers.
#[derive(Debug, Default)]
pub struct CostLedger {
    total_nanodollars: AtomicI64,
    calls: AtomicU64,
    failed_calls: AtomicU64,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_nanodollars(&self) -> i64 {
        self.total_nanodollars.load(Ordering::Relaxed)
    }

    pub fn total_usd(&self) -> f64 {
        nanodollars_to_usd(self.total_nanodollars())
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn failed_calls(&self) -> u64 {
        self.failed_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UsageSink for CostLedger {
    async fn record(&self, record: ProviderCallRecord) {
        debug!(
            provider = record.provider,
            model = %record.model,
            caller = record.caller,
            job_id = ?record.job_id,
            tokens = record.input_tokens + record.output_tokens,
            cost_nanos = record.cost_nanodollars,
            upstream_cost_nanos = ?record.upstream_cost_nanodollars,
            latency_ms = record.latency_ms,
            status = record.status.as_str(),
            error_code = ?record.error_code,
            at = %record.timestamp,
            "provider call recorded"
        );
        self.calls.fetch_add(1, Ordering::Relaxed);
        if record.status == CallStatus::Error {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }
        self.total_nanodollars
            .fetch_add(record.cost_nanodollars, Ordering::Relaxed);
    }

    fn total_cost_nanodollars(&self) -> Option<i64> {
        Some(self.total_nanodollars())
    }
}
