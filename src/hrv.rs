//! # HRV Statistics
//!
//! Time-domain heart-rate-variability metrics over a chronological sequence of RR
//! intervals in seconds.
//!
//! All functions are total: sequences too short for a metric yield 0 instead of NaN
//! or a panic, because cold starts and short gaps are routine in a streaming
//! pipeline. Successive-difference metrics are order-sensitive, so callers must
//! never sort the input.

use chrono::Utc;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::{HrvSnapshot, RrSource};

/// Successive difference counted by NN50 (50 ms).
pub const NN50_THRESHOLD_S: f64 = 0.05;

/// Physiologically plausible RR interval range, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RrBounds {
    pub min_s: f64,
    pub max_s: f64,
}

impl Default for RrBounds {
    fn default() -> Self {
        RrBounds {
            min_s: 0.3,
            max_s: 2.0,
        }
    }
}

impl RrBounds {
    pub fn contains(&self, rr_s: f64) -> bool {
        rr_s.is_finite() && rr_s >= self.min_s && rr_s <= self.max_s
    }
}

/// Drop (never clamp) intervals outside `bounds`, preserving order.
pub fn filter_physiological(rr_s: &[f64], bounds: RrBounds) -> Vec<f64> {
    rr_s.iter().copied().filter(|&rr| bounds.contains(rr)).collect()
}

/// Root mean square of successive differences, in milliseconds.
pub fn rmssd_ms(rr_s: &[f64]) -> f64 {
    if rr_s.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = rr_s.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    (sum_sq / (rr_s.len() - 1) as f64).sqrt() * 1000.0
}

/// Sample standard deviation of the intervals, in milliseconds.
pub fn sdnn_ms(rr_s: &[f64]) -> f64 {
    if rr_s.len() < 2 {
        return 0.0;
    }
    let mean = rr_s.iter().sum::<f64>() / rr_s.len() as f64;
    let variance = rr_s.iter().map(|rr| (rr - mean).powi(2)).sum::<f64>() / (rr_s.len() - 1) as f64;
    variance.sqrt() * 1000.0
}

/// Mean heart rate in BPM; 0 for empty input or a non-positive mean interval.
pub fn mean_hr_bpm(rr_s: &[f64]) -> f64 {
    if rr_s.is_empty() {
        return 0.0;
    }
    let mean = rr_s.iter().sum::<f64>() / rr_s.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    60.0 / mean
}

/// Count of successive differences strictly greater than `threshold_s`.
pub fn nn_count(rr_s: &[f64], threshold_s: f64) -> usize {
    rr_s.windows(2)
        .filter(|w| (w[1] - w[0]).abs() > threshold_s)
        .count()
}

/// NN50 with the standard 50 ms threshold.
pub fn nn50(rr_s: &[f64]) -> usize {
    nn_count(rr_s, NN50_THRESHOLD_S)
}

/// NN count as a percentage of all successive differences.
pub fn pnn_percent(rr_s: &[f64], threshold_s: f64) -> f64 {
    if rr_s.len() < 2 {
        return 0.0;
    }
    100.0 * nn_count(rr_s, threshold_s) as f64 / (rr_s.len() - 1) as f64
}

/// pNN50 in percent.
pub fn pnn50(rr_s: &[f64]) -> f64 {
    pnn_percent(rr_s, NN50_THRESHOLD_S)
}

impl HrvSnapshot {
    /// Compute every metric over `rr_s`, which must already be filtered and in
    /// chronological order.
    pub fn from_rr(rr_s: &[f64], window_seconds: f64, source: RrSource) -> Self {
        Self::from_rr_with_threshold(rr_s, window_seconds, source, NN50_THRESHOLD_S)
    }

    pub fn from_rr_with_threshold(
        rr_s: &[f64],
        window_seconds: f64,
        source: RrSource,
        nn_threshold_s: f64,
    ) -> Self {
        trace!("HRV snapshot over {} intervals ({:?})", rr_s.len(), source);
        HrvSnapshot {
            rmssd_ms: rmssd_ms(rr_s),
            sdnn_ms: sdnn_ms(rr_s),
            mean_hr_bpm: mean_hr_bpm(rr_s),
            nn50: nn_count(rr_s, nn_threshold_s),
            pnn50: pnn_percent(rr_s, nn_threshold_s),
            beat_count: if rr_s.is_empty() { 0 } else { rr_s.len() + 1 },
            window_seconds,
            source,
            computed_at: Utc::now(),
        }
    }

    /// Like [`HrvSnapshot::from_rr`] but `None` when fewer than two intervals
    /// exist, separating "not enough data yet" from "computed and flat".
    pub fn try_from_rr(
        rr_s: &[f64],
        window_seconds: f64,
        source: RrSource,
        nn_threshold_s: f64,
    ) -> Option<Self> {
        if rr_s.len() < 2 {
            return None;
        }
        Some(Self::from_rr_with_threshold(rr_s, window_seconds, source, nn_threshold_s))
    }
}
