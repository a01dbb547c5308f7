//! Telemetry Record Types
//!
//! Wire payload, canonical record, and the enrichment attached by the
//! analyzers. Data structures only - no analysis logic here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::anomaly::types::Anomaly;
use super::threat::types::ThreatVerdict;

// ============================================================================
// WIRE PAYLOAD
// ============================================================================

/// One telemetry record as submitted by the client library or broker.
///
/// Numeric counters are accepted as signed so that a negative value becomes a
/// per-record rejection instead of a deserialization failure for the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTelemetry {
    pub trace_id: String,
    pub model_id: String,
    pub prompt: String,
    pub response: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub latency_ms: f64,
    pub cost_usd: f64,
    pub ingested_at: DateTime<Utc>,

    #[serde(default)]
    pub error_occurred: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Carried opaquely into tags as `meta.<key>`.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Carried opaquely into tags as `demo_mode`.
    #[serde(default)]
    pub demo_mode: Option<bool>,
}

impl RawTelemetry {
    /// Validate field-level invariants. Returns the first violation as a
    /// rejection reason; one bad record never rejects the rest of a batch.
    pub fn validate(&self) -> Result<(), String> {
        if self.trace_id.trim().is_empty() {
            return Err("trace_id must be non-empty".to_string());
        }
        if self.model_id.trim().is_empty() {
            return Err("model_id must be non-empty".to_string());
        }
        if self.input_tokens < 0 {
            return Err(format!("input_tokens must be >= 0, got {}", self.input_tokens));
        }
        if self.output_tokens < 0 {
            return Err(format!("output_tokens must be >= 0, got {}", self.output_tokens));
        }
        if !self.latency_ms.is_finite() || self.latency_ms < 0.0 {
            return Err(format!("latency_ms must be >= 0, got {}", self.latency_ms));
        }
        if !self.cost_usd.is_finite() || self.cost_usd < 0.0 {
            return Err(format!("cost_usd must be >= 0, got {}", self.cost_usd));
        }
        Ok(())
    }
}

// ============================================================================
// CANONICAL RECORD
// ============================================================================

/// The unit of work. Created by the Normalizer, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub trace_id: String,
    pub ingested_at: DateTime<Utc>,
    pub model_id: String,
    pub prompt: String,
    pub response: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: f64,
    pub cost_usd: f64,
    pub error_occurred: bool,
    pub user_id: String,
    pub session_id: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl TelemetryRecord {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

// ============================================================================
// QUALITY SCORE
// ============================================================================

/// AI-assessed response quality. `overall` is `None` when the classifier
/// failed terminally; downstream treats that as "not contributing".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    pub coherence: f64,
    pub relevance: f64,
    pub completeness: f64,
    pub overall: Option<f64>,
    pub explanation: String,
}

impl QualityScore {
    /// Sentinel returned without an AI call when analysis is disabled or the
    /// response is empty.
    pub fn skipped() -> Self {
        Self {
            coherence: 1.0,
            relevance: 1.0,
            completeness: 1.0,
            overall: Some(1.0),
            explanation: "skipped".to_string(),
        }
    }

    /// Terminal-failure marker: sub-scores are meaningless, overall is null.
    pub fn failed(reason: &str) -> Self {
        Self {
            coherence: 0.0,
            relevance: 0.0,
            completeness: 0.0,
            overall: None,
            explanation: format!("analysis failed: {}", reason),
        }
    }
}

// ============================================================================
// ENRICHMENT
// ============================================================================

/// Everything the analyzers attached to one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub quality: Option<QualityScore>,
    pub threats: Vec<ThreatVerdict>,
    pub anomalies: Vec<Anomaly>,
    /// True when at least one analyzer failed terminally for this record.
    pub partial: bool,
}

// ============================================================================
// TESTS
// ============================================================================
