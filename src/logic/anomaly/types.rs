//! Anomaly Types
//!
//! Sealed metric set, trigger kinds, and the Anomaly artifact.

use serde::{Deserialize, Serialize};

use crate::logic::threat::types::Severity;

// ============================================================================
// METRIC KIND
// ============================================================================

/// The sealed set of monitored metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cost,
    Latency,
    Quality,
    ErrorRate,
    TokenRate,
    RequestRate,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cost => "cost",
            MetricKind::Latency => "latency",
            MetricKind::Quality => "quality",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::TokenRate => "token_rate",
            MetricKind::RequestRate => "request_rate",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TRIGGER
// ============================================================================

/// How an anomaly fired: fixed threshold or z-score on the rolling baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Absolute,
    Statistical,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Absolute => "absolute",
            Trigger::Statistical => "statistical",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// ANOMALY
// ============================================================================

/// One detected deviation. `z_score` is `None` for absolute triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric: MetricKind,
    pub observed: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub z_score: Option<f64>,
    pub trigger: Trigger,
    pub severity: Severity,
}

impl Anomaly {
    /// Deterministic one-line description used in incident summaries.
    pub fn indicator(&self) -> String {
        match self.z_score {
            Some(z) => format!(
                "{} {:.4} deviates {:.1} sigma from baseline {:.4}",
                self.metric, self.observed, z.abs(), self.baseline_mean
            ),
            None => format!(
                "{} {:.4} crossed absolute threshold",
                self.metric, self.observed
            ),
        }
    }
}

/// Map |z| to severity. Callers guarantee |z| >= the configured threshold.
pub fn severity_from_z(z: f64) -> Severity {
    let z = z.abs();
    if z >= 5.0 {
        Severity::Critical
    } else if z >= 4.0 {
        Severity::High
    } else if z >= 3.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_z_severity_ladder() {
        assert_eq!(severity_from_z(3.0), Severity::Low);
        assert_eq!(severity_from_z(3.5), Severity::Medium);
        assert_eq!(severity_from_z(-4.2), Severity::High);
        assert_eq!(severity_from_z(5.1), Severity::Critical);
    }

    #[test]
    fn test_indicator_is_deterministic() {
        let a = Anomaly {
            metric: MetricKind::Cost,
            observed: 500.0,
            baseline_mean: 0.01,
            baseline_stddev: 0.001,
            z_score: Some(10.2),
            trigger: Trigger::Statistical,
            severity: Severity::Critical,
        };
        assert_eq!(a.indicator(), a.indicator());
        assert!(a.indicator().starts_with("cost"));
    }
}
