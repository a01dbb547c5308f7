//! Incident Synthesizer
//!
//! Decides whether analyzer outputs warrant an Incident and assembles one.
//! Pure policy: given the same enrichment and config, the output is
//! byte-identical except for the random tail of the id.

use chrono::{DateTime, Utc};
use uuid::{NoContext, Timestamp, Uuid};

use crate::config::PipelineConfig;
use crate::logic::anomaly::types::{MetricKind, Trigger};
use crate::logic::record::{Enrichment, TelemetryRecord};
use crate::logic::threat::types::{Severity, ThreatKind};

use super::types::{Incident, IncidentStatus};

/// Summaries quote at most this many contributors.
const SUMMARY_TOP: usize = 3;

/// Build an Incident from the enrichment, or `None` when nothing warrants
/// surfacing one.
pub fn synthesize(
    cfg: &PipelineConfig,
    record: &TelemetryRecord,
    enrichment: &Enrichment,
) -> Option<Incident> {
    let quality_low = enrichment
        .quality
        .as_ref()
        .and_then(|q| q.overall)
        .map(|o| o < cfg.quality_min_overall)
        .unwrap_or(false);

    let has_threats = enrichment.threats.iter().any(|t| t.is_threat());
    if !has_threats && enrichment.anomalies.is_empty() && !quality_low {
        return None;
    }

    let severity = decide_severity(enrichment, quality_low);
    let summary = build_summary(enrichment, quality_low, cfg.quality_min_overall);

    Some(Incident {
        id: id_from(record.ingested_at),
        trace_id: record.trace_id.clone(),
        created_at: Utc::now(),
        severity,
        status: IncidentStatus::Open,
        threats: enrichment.threats.iter().filter(|t| t.is_threat()).cloned().collect(),
        anomalies: enrichment.anomalies.clone(),
        quality: if quality_low { enrichment.quality.clone() } else { None },
        summary,
        partial: enrichment.partial,
    })
}

/// Lexicographically-sortable id: UUIDv7 whose timestamp half is seeded from
/// `ingested_at`, with a random tail.
fn id_from(ingested_at: DateTime<Utc>) -> Uuid {
    let ts = Timestamp::from_unix(
        NoContext,
        ingested_at.timestamp().max(0) as u64,
        ingested_at.timestamp_subsec_nanos(),
    );
    Uuid::new_v7(ts)
}

// ============================================================================
// SEVERITY
// ============================================================================

/// Max across contributors, with two promotions:
/// - two or more distinct high-severity contributors escalate to critical
/// - an absolute cost anomaly combined with prompt injection is critical
fn decide_severity(enrichment: &Enrichment, quality_low: bool) -> Severity {
    let mut max = Severity::Low;
    let mut high_contributors = 0usize;

    let mut take = |sev: Severity| {
        if sev == Severity::High {
            high_contributors += 1;
        }
        if sev > max {
            max = sev;
        }
    };

    for t in enrichment.threats.iter().filter(|t| t.is_threat()) {
        take(t.severity);
    }
    for a in &enrichment.anomalies {
        take(a.severity);
    }
    if quality_low {
        take(Severity::High);
    }

    if high_contributors >= 2 {
        max = Severity::Critical;
    }

    let absolute_cost = enrichment
        .anomalies
        .iter()
        .any(|a| a.metric == MetricKind::Cost && a.trigger == Trigger::Absolute);
    let injection = enrichment
        .threats
        .iter()
        .any(|t| t.kind == ThreatKind::PromptInjection);
    if absolute_cost && injection {
        max = Severity::Critical;
    }

    max
}

// ============================================================================
// SUMMARY
// ============================================================================

/// Deterministic summary: top contributors in a fixed order - threats by
/// kind, then anomalies by metric, then the quality shortfall. Partial
/// incidents note which analyzer contributed nothing.
fn build_summary(enrichment: &Enrichment, quality_low: bool, quality_min: f64) -> String {
    let mut parts: Vec<String> = Vec::new();

    let mut threats: Vec<_> = enrichment.threats.iter().filter(|t| t.is_threat()).collect();
    threats.sort_by(|a, b| {
        a.kind
            .as_str()
            .cmp(b.kind.as_str())
            .then(a.scope.as_str().cmp(b.scope.as_str()))
    });
    for t in threats {
        let indicator = t
            .indicators
            .first()
            .map(String::as_str)
            .unwrap_or("no indicator");
        parts.push(format!("{} in {}: {}", t.kind, t.scope, indicator));
    }

    let mut anomalies: Vec<_> = enrichment.anomalies.iter().collect();
    anomalies.sort_by(|a, b| a.metric.as_str().cmp(b.metric.as_str()));
    for a in anomalies {
        parts.push(a.indicator());
    }

    if quality_low {
        if let Some(q) = &enrichment.quality {
            if let Some(overall) = q.overall {
                parts.push(format!(
                    "quality {:.2} below threshold {:.2}",
                    overall, quality_min
                ));
            }
        }
    }

    let mut summary = parts
        .into_iter()
        .take(SUMMARY_TOP)
        .collect::<Vec<_>>()
        .join("; ");

    if enrichment.partial {
        let mut missing: Vec<&str> = Vec::new();
        if enrichment.quality.as_ref().map_or(false, |q| q.overall.is_none()) {
            missing.push("quality analyzer contributed no data");
        }
        if missing.is_empty() {
            missing.push("an analyzer contributed no data");
        }
        summary.push_str(&format!(" [partial: {}]", missing.join(", ")));
    }

    summary
}

// ============================================================================
// TESTS
// ============================================================================
