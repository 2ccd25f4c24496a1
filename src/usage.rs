//! Usage records and the sinks that receive them.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::ProviderKind;
use crate::pricing;
use crate::types::Usage;

/// Request type tag attached to image generation records.
pub const IMAGE_REQUEST_TYPE: &str = "AiImage";

/// One chat or image call, successful or not.
///
/// Cost is not stored: [`UsageRecord::cost`] reprices the record from the current
/// pricing table every time it is asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: Option<u64>,
    pub team_id: Option<u64>,
    pub ip: Option<String>,
    pub provider: ProviderKind,
    pub model: String,
    pub request_type: String,
    /// JSON of the caller's messages, or the image prompt.
    pub request_payload: String,
    /// Content on success, otherwise the raw response or `"<status>: <message>"`.
    pub response_payload: String,
    pub success: bool,
    /// `None` when the call failed before any usage was known.
    pub usage: Option<Usage>,
    pub latency_ms: u64,
}

impl UsageRecord {
    /// Cost in USD under the current pricing table.
    pub fn cost(&self) -> f64 {
        self.usage.map_or(0.0, |usage| {
            pricing::cost(
                self.provider,
                &self.model,
                usage.prompt_tokens,
                usage.completion_tokens,
            )
        })
    }
}

/// Error raised by a [`UsageSink`]. The gateway logs it and moves on.
#[derive(Debug, Error)]
#[error("usage sink failed: {message}")]
pub struct SinkError {
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Write-only destination for usage records.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: UsageRecord) -> Result<(), SinkError>;
}

/// Emits each record as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: UsageRecord) -> Result<(), SinkError> {
        let usage = record.usage.unwrap_or_default();
        info!(
            target: "modelgate::usage",
            user_id = record.user_id,
            team_id = record.team_id,
            ip = record.ip.as_deref(),
            provider = record.provider.as_str(),
            model = %record.model,
            request_type = %record.request_type,
            success = record.success,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            cost_usd = record.cost(),
            latency_ms = record.latency_ms,
            "ai usage"
        );
        Ok(())
    }
}

/// Keeps records in memory, mostly for tests and local inspection.
#[derive(Debug, Default)]
pub struct MemoryUsageSink {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UsageSink for MemoryUsageSink {
    async fn record(&self, record: UsageRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .map_err(|_| SinkError::new("memory sink lock poisoned"))?
            .push(record);
        Ok(())
    }
}
