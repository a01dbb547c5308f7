//! Incident Types
//!
//! The synthesis artifact and its status machine. Data structures plus the
//! transition rules - synthesis policy lives in `synthesizer.rs`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::logic::anomaly::types::Anomaly;
use crate::logic::record::QualityScore;
use crate::logic::threat::types::{Severity, ThreatVerdict};

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected transition. Expected in normal operation, so it is surfaced to
/// the caller and never logged at error level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: IncidentStatus,
    pub to: IncidentStatus,
}

impl std::fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal incident transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

// ============================================================================
// INCIDENT
// ============================================================================

/// One surfaced finding. Holds the `trace_id` and copies of the indicators
/// it needs; records never point back at incidents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub threats: Vec<ThreatVerdict>,
    pub anomalies: Vec<Anomaly>,
    /// Present iff the quality score contributed to the incident.
    pub quality: Option<QualityScore>,
    pub summary: String,
    /// True when at least one analyzer failed terminally for this record.
    pub partial: bool,
}

impl Incident {
    /// Apply a status change. Re-applying the current status is a no-op;
    /// only `open -> acknowledged` and `acknowledged -> resolved` are legal.
    /// Returns whether the status actually changed.
    pub fn transition(&mut self, to: IncidentStatus) -> Result<bool, IllegalTransition> {
        use IncidentStatus::*;
        if self.status == to {
            return Ok(false);
        }
        match (self.status, to) {
            (Open, Acknowledged) | (Acknowledged, Resolved) => {
                self.status = to;
                Ok(true)
            }
            (from, to) => Err(IllegalTransition { from, to }),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
