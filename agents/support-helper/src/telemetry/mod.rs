//! Telemetry for the Support Helper Agent
//!
//! This module provides:
//! - [`MetricsRecord`]: the one-per-query row (tokens, latency, cost, error)
//! - Fixed model and pricing constants used for cost estimation
//! - [`sink`]: where records go (CSV file or memory)
//! - [`SafetyDecision`]: the audit entry logged for every screening decision
//! - Query fingerprinting so logs never carry raw customer text

pub mod sink;

pub use sink::{CsvMetricsSink, MemoryMetricsSink, MetricsSink};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

use crate::client::TokenUsage;
use crate::error::QueryError;
use crate::safety::{BlockReason, SafetyVerdict};

/// Model requested for every query
pub const MODEL: &str = "openai/gpt-4o-mini";

/// USD per one million prompt tokens
pub const INPUT_COST_PER_MILLION: f64 = 0.15;

/// USD per one million completion tokens
pub const OUTPUT_COST_PER_MILLION: f64 = 0.60;

/// Characters of a query kept in log previews
pub const PREVIEW_CHARS: usize = 100;

/// Metrics sink errors
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Metrics I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// One row of per-query metrics.
///
/// Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// RFC 3339 UTC time the query finished
    pub timestamp: String,
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub total_tokens: u64,
    pub latency_ms: f64,
    pub estimated_cost_usd: f64,
    pub model: String,
    /// Empty on success
    pub error: Option<String>,
}

impl MetricsRecord {
    fn new(usage: TokenUsage, latency: Duration, error: Option<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            tokens_prompt: usage.prompt_tokens,
            tokens_completion: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            latency_ms: round_to(latency.as_secs_f64() * 1000.0, 2),
            estimated_cost_usd: estimate_cost(usage.prompt_tokens, usage.completion_tokens),
            model: MODEL.to_string(),
            error,
        }
    }

    /// Record for a validated response
    pub fn completed(usage: TokenUsage, latency: Duration) -> Self {
        Self::new(usage, latency, None)
    }

    /// Record for a query stopped by the safety screen; no tokens were spent
    pub fn blocked(verdict: &SafetyVerdict, latency: Duration) -> Self {
        Self::new(
            TokenUsage::default(),
            latency,
            Some(format!("safety_blocked: {}", verdict)),
        )
    }

    /// Record for a failed query.
    ///
    /// `usage` is the API-reported usage when the model was reached (schema
    /// failures), `None` otherwise.
    pub fn failed(error: &QueryError, usage: Option<TokenUsage>, latency: Duration) -> Self {
        Self::new(
            usage.unwrap_or_default(),
            latency,
            Some(format!("{}: {}", error.kind(), error)),
        )
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Audit entry for one safety screen decision.
///
/// Identifies the query by fingerprint, length and preview only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyDecision {
    pub timestamp: String,
    pub allowed: bool,
    pub reason: BlockReason,
    pub detail: Option<String>,
    pub query_fingerprint: String,
    pub query_len: usize,
    pub query_preview: String,
}

impl SafetyDecision {
    pub fn new(query: &str, verdict: &SafetyVerdict) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            allowed: verdict.allowed,
            reason: verdict.reason,
            detail: verdict.detail.clone(),
            query_fingerprint: query_fingerprint(query),
            query_len: query.chars().count(),
            query_preview: query_preview(query),
        }
    }
}

/// Estimated USD cost for the given token counts, rounded to 6 decimals
pub fn estimate_cost(prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let cost = prompt_tokens as f64 * INPUT_COST_PER_MILLION / 1_000_000.0
        + completion_tokens as f64 * OUTPUT_COST_PER_MILLION / 1_000_000.0;
    round_to(cost, 6)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Short stable identifier for a query (first 16 hex chars of SHA-256)
pub fn query_fingerprint(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// First [`PREVIEW_CHARS`] characters of a query, on one line
pub fn query_preview(query: &str) -> String {
    let mut preview: String = query
        .chars()
        .take(PREVIEW_CHARS)
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if query.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}
