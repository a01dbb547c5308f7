//! Rolling Window
//!
//! Fixed-capacity, time-ordered sample set with incrementally maintained
//! mean/variance (Welford). Samples older than the horizon are evicted on
//! each append, so the baseline always reflects recent behavior.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// Guard against division by a vanishing stddev.
pub const SIGMA_FLOOR: f64 = 1e-9;

pub struct RollingWindow {
    capacity: usize,
    horizon: Duration,
    samples: VecDeque<(DateTime<Utc>, f64)>,
    mean: f64,
    m2: f64,
}

impl RollingWindow {
    pub fn new(capacity: usize, horizon: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            horizon,
            samples: VecDeque::new(),
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Append a sample, evicting anything past capacity or the horizon.
    pub fn push(&mut self, at: DateTime<Utc>, value: f64) {
        let cutoff = at - self.horizon;
        while let Some(&(ts, v)) = self.samples.front() {
            if ts < cutoff || self.samples.len() >= self.capacity {
                self.samples.pop_front();
                self.remove_stat(v);
            } else {
                break;
            }
        }

        self.samples.push_back((at, value));
        self.add_stat(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation, floored at `SIGMA_FLOOR`.
    pub fn stddev(&self) -> f64 {
        if self.samples.is_empty() {
            return SIGMA_FLOOR;
        }
        let var = (self.m2 / self.samples.len() as f64).max(0.0);
        var.sqrt().max(SIGMA_FLOOR)
    }

    /// Z-score of a value against the current baseline.
    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean) / self.stddev()
    }

    fn add_stat(&mut self, x: f64) {
        let n = self.samples.len() as f64;
        let delta = x - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (x - self.mean);
    }

    fn remove_stat(&mut self, x: f64) {
        let n = self.samples.len() as f64;
        if n == 0.0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        // Reverse Welford update: undo the contribution of x.
        let old_mean = self.mean;
        self.mean = (old_mean * (n + 1.0) - x) / n;
        self.m2 = (self.m2 - (x - old_mean) * (x - self.mean)).max(0.0);
    }
}

// ============================================================================
// TESTS
// ============================================================================
