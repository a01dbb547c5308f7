//! Anomaly Detection Engine
//!
//! Maintains rolling statistics per metric and emits `Anomaly` entries.
//! Absolute threshold checks run even while a window is warming up;
//! statistical checks wait for `min_samples_for_stat`.
//!
//! Window updates are serialized per metric - one lock per window, never a
//! global lock - so concurrent record tasks only contend when they touch the
//! same metric.

pub mod types;
pub mod window;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::config::PipelineConfig;
use crate::logic::record::TelemetryRecord;
use crate::logic::threat::types::Severity;
use types::{severity_from_z, Anomaly, MetricKind, Trigger};
use window::RollingWindow;

// ============================================================================
// RATE TRACKER
// ============================================================================

/// One-hour sliding window over (timestamp, cost, tokens), used to project
/// 24 h cost for the absolute trigger and derive requests/hour.
struct RateTracker {
    entries: VecDeque<(DateTime<Utc>, f64, u64)>,
    cost_sum: f64,
    token_sum: u64,
}

impl RateTracker {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            cost_sum: 0.0,
            token_sum: 0,
        }
    }

    fn record(&mut self, at: DateTime<Utc>, cost: f64, tokens: u64) {
        self.entries.push_back((at, cost, tokens));
        self.cost_sum += cost;
        self.token_sum += tokens;

        let cutoff = at - Duration::hours(1);
        while let Some(&(ts, c, t)) = self.entries.front() {
            if ts < cutoff {
                self.entries.pop_front();
                self.cost_sum -= c;
                self.token_sum -= t;
            } else {
                break;
            }
        }
    }

    fn hourly_cost(&self) -> f64 {
        self.cost_sum.max(0.0)
    }

    fn requests_per_hour(&self) -> f64 {
        self.entries.len() as f64
    }
}

// ============================================================================
// ERROR-RATE BUCKETS
// ============================================================================

/// Counters over the current rolling 5-minute bucket.
struct ErrorBucket {
    bucket_start: i64,
    requests_total: u64,
    errors_total: u64,
}

impl ErrorBucket {
    const WIDTH_SECS: i64 = 300;

    fn new() -> Self {
        Self {
            bucket_start: 0,
            requests_total: 0,
            errors_total: 0,
        }
    }

    fn record(&mut self, at: DateTime<Utc>, is_error: bool) {
        let bucket = at.timestamp().div_euclid(Self::WIDTH_SECS) * Self::WIDTH_SECS;
        if bucket != self.bucket_start {
            self.bucket_start = bucket;
            self.requests_total = 0;
            self.errors_total = 0;
        }
        self.requests_total += 1;
        if is_error {
            self.errors_total += 1;
        }
    }

    fn error_rate(&self) -> f64 {
        if self.requests_total == 0 {
            return 0.0;
        }
        self.errors_total as f64 / self.requests_total as f64
    }
}

// ============================================================================
// DETECTOR
// ============================================================================

pub struct AnomalyDetector {
    cfg: Arc<PipelineConfig>,
    cost: Mutex<RollingWindow>,
    latency: Mutex<RollingWindow>,
    quality: Mutex<RollingWindow>,
    tokens: Mutex<RollingWindow>,
    request_rate: Mutex<RollingWindow>,
    errors: Mutex<ErrorBucket>,
    rates: Mutex<RateTracker>,
}

impl AnomalyDetector {
    pub fn new(cfg: Arc<PipelineConfig>) -> Self {
        let make = || {
            Mutex::new(RollingWindow::new(
                cfg.window_capacity,
                Duration::seconds(cfg.sample_horizon_secs),
            ))
        };
        Self {
            cost: make(),
            latency: make(),
            quality: make(),
            tokens: make(),
            request_rate: make(),
            errors: Mutex::new(ErrorBucket::new()),
            rates: Mutex::new(RateTracker::new()),
            cfg,
        }
    }

    /// Per-record pass over every metric except quality, which arrives later
    /// from its own analyzer (see `observe_quality`). Returned anomalies are
    /// already deduplicated by metric.
    pub fn observe(&self, record: &TelemetryRecord) -> Vec<Anomaly> {
        if !self.cfg.enable_anomaly_detection {
            return vec![];
        }

        let at = record.ingested_at;
        let mut found: Vec<Anomaly> = Vec::new();

        // Hourly rates first: the cost projection must include this record.
        let (hourly_cost, req_rate) = {
            let mut rates = self.rates.lock();
            rates.record(at, record.cost_usd, record.total_tokens());
            (rates.hourly_cost(), rates.requests_per_hour())
        };

        // Cost: absolute 24h projection (strict greater-than), then z-score.
        {
            let mut w = self.cost.lock();
            w.push(at, record.cost_usd);
            let projected = hourly_cost * 24.0;
            if projected > self.cfg.cost_anomaly_usd_per_day {
                found.push(Anomaly {
                    metric: MetricKind::Cost,
                    observed: projected,
                    baseline_mean: w.mean(),
                    baseline_stddev: w.stddev(),
                    z_score: None,
                    trigger: Trigger::Absolute,
                    severity: Severity::Critical,
                });
            }
            if let Some(a) = self.statistical_check(&w, MetricKind::Cost, record.cost_usd) {
                found.push(a);
            }
        }

        // Latency: absolute threshold, then z-score.
        {
            let mut w = self.latency.lock();
            w.push(at, record.latency_ms);
            if record.latency_ms > self.cfg.latency_abs_ms {
                found.push(Anomaly {
                    metric: MetricKind::Latency,
                    observed: record.latency_ms,
                    baseline_mean: w.mean(),
                    baseline_stddev: w.stddev(),
                    z_score: None,
                    trigger: Trigger::Absolute,
                    severity: Severity::High,
                });
            }
            if let Some(a) = self.statistical_check(&w, MetricKind::Latency, record.latency_ms) {
                found.push(a);
            }
        }

        // Tokens: statistical only.
        {
            let total = record.total_tokens() as f64;
            let mut w = self.tokens.lock();
            w.push(at, total);
            if let Some(a) = self.statistical_check(&w, MetricKind::TokenRate, total) {
                found.push(a);
            }
        }

        // Request rate: statistical over the hourly rate series.
        {
            let mut w = self.request_rate.lock();
            w.push(at, req_rate);
            if let Some(a) = self.statistical_check(&w, MetricKind::RequestRate, req_rate) {
                found.push(a);
            }
        }

        // Error rate: absolute threshold on the 5-minute bucket. Requires a
        // minimum request count so one failed request cannot alarm alone.
        {
            let mut bucket = self.errors.lock();
            bucket.record(at, record.error_occurred);
            let rate = bucket.error_rate();
            if bucket.requests_total >= self.cfg.min_samples_for_stat as u64
                && rate > self.cfg.error_rate_max
            {
                found.push(Anomaly {
                    metric: MetricKind::ErrorRate,
                    observed: rate,
                    baseline_mean: self.cfg.error_rate_max,
                    baseline_stddev: 0.0,
                    z_score: None,
                    trigger: Trigger::Absolute,
                    severity: Severity::Critical,
                });
            }
        }

        dedup_by_metric(found)
    }

    /// Quality feedback loop: called after the Quality Classifier finished,
    /// with its overall score. Updates the quality window and runs the
    /// absolute + statistical checks for the quality metric.
    pub fn observe_quality(&self, at: DateTime<Utc>, overall: f64) -> Vec<Anomaly> {
        if !self.cfg.enable_anomaly_detection {
            return vec![];
        }

        let mut found = Vec::new();
        let mut w = self.quality.lock();
        w.push(at, overall);

        if overall < self.cfg.quality_min_overall {
            found.push(Anomaly {
                metric: MetricKind::Quality,
                observed: overall,
                baseline_mean: w.mean(),
                baseline_stddev: w.stddev(),
                z_score: None,
                trigger: Trigger::Absolute,
                severity: Severity::High,
            });
        }
        if let Some(a) = self.statistical_check(&w, MetricKind::Quality, overall) {
            found.push(a);
        }

        dedup_by_metric(found)
    }

    /// Sample counts per window, for the health surface.
    pub fn window_depths(&self) -> HashMap<MetricKind, usize> {
        HashMap::from([
            (MetricKind::Cost, self.cost.lock().len()),
            (MetricKind::Latency, self.latency.lock().len()),
            (MetricKind::Quality, self.quality.lock().len()),
            (MetricKind::TokenRate, self.tokens.lock().len()),
            (MetricKind::RequestRate, self.request_rate.lock().len()),
        ])
    }

    fn statistical_check(
        &self,
        w: &RollingWindow,
        metric: MetricKind,
        value: f64,
    ) -> Option<Anomaly> {
        if w.len() < self.cfg.min_samples_for_stat {
            return None;
        }
        let z = w.z_score(value);
        if z.abs() < self.cfg.cost_z_threshold {
            return None;
        }
        Some(Anomaly {
            metric,
            observed: value,
            baseline_mean: w.mean(),
            baseline_stddev: w.stddev(),
            z_score: Some(z),
            trigger: Trigger::Statistical,
            severity: severity_from_z(z),
        })
    }
}

/// Collapse multiple anomalies for the same metric, keeping the higher
/// severity (first wins on ties, so absolute triggers shadow statistical
/// ones of equal severity).
pub fn dedup_by_metric(anomalies: Vec<Anomaly>) -> Vec<Anomaly> {
    let mut best: Vec<Anomaly> = Vec::new();
    for a in anomalies {
        match best.iter_mut().find(|b| b.metric == a.metric) {
            Some(existing) => {
                if a.severity > existing.severity {
                    *existing = a;
                }
            }
            None => best.push(a),
        }
    }
    best
}

// ============================================================================
// TESTS
// ============================================================================
