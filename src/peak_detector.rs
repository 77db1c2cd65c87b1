//! # R-Peak Detection
//!
//! A five-stage Pan-Tompkins style detector that turns one finite ECG window into
//! R-peak sample indices, and those indices into RR intervals.
//!
//! ## Pipeline
//! 1. **Bandpass**: moving-average subtraction (high-pass, ≈5 Hz) followed by
//!    moving-average smoothing (low-pass, ≈15 Hz)
//! 2. **Differentiate**: first difference, first sample zero
//! 3. **Square**: emphasises the steep QRS slopes
//! 4. **Integrate**: ≈120 ms moving window, the energy envelope
//! 5. **Threshold + localize**: robust `median + k·MAD` or adaptive `fraction × local max`;
//!    the envelope maximum in a short forward window is relocated to the largest
//!    sample of the *original* signal nearby, compensating for filter smearing
//!
//! A candidate closer than the refractory period (or the shortest plausible RR
//! interval) to the previous accepted peak is merged with it: the candidate with the
//! larger original amplitude wins.
//!
//! The detector keeps no state between calls. Every window is analysed on its own,
//! so one bad batch can never corrupt later windows.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::filters::{
    argmax_in, first_difference, high_pass_moving_average, median, median_abs_deviation,
    moving_average, seconds_to_samples, square,
};
use crate::hrv::{filter_physiological, RrBounds};

/// Envelope maxima below this are rounding residue of a flat signal.
const FLAT_ENVELOPE: f64 = 1e-12;

/// Envelope threshold strategy.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ThresholdMode {
    /// `median(envelope) + k × MAD(envelope)` over the whole window
    RobustMad { k: f64 },
    /// `fraction × max(envelope)` over a trailing lookback
    Adaptive { fraction: f64, lookback_s: f64 },
}

/// Tunable constants of the detector.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PeakDetectorConfig {
    /// High-pass corner of the bandpass, Hz
    pub low_cutoff_hz: f64,
    /// Low-pass corner of the bandpass, Hz
    pub high_cutoff_hz: f64,
    /// Energy envelope integration window (≈ QRS width), seconds
    pub integration_window_s: f64,
    pub threshold: ThresholdMode,
    /// Threshold never drops below this fraction of the envelope maximum
    pub noise_floor_fraction: f64,
    /// Forward search for the envelope maximum after a threshold crossing, seconds
    pub search_window_s: f64,
    /// Radius around the envelope maximum searched in the original signal, seconds
    pub relocation_radius_s: f64,
    /// Minimum time between accepted peaks, seconds
    pub refractory_s: f64,
}

impl Default for PeakDetectorConfig {
    fn default() -> Self {
        PeakDetectorConfig {
            low_cutoff_hz: 5.0,
            high_cutoff_hz: 15.0,
            integration_window_s: 0.12,
            threshold: ThresholdMode::RobustMad { k: 4.0 },
            noise_floor_fraction: 0.1,
            search_window_s: 0.12,
            relocation_radius_s: 0.08,
            refractory_s: 0.25,
        }
    }
}

/// Stateless R-peak detector.
///
/// # Example
/// ```
/// use hrv_tracker_lib::peak_detector::PeakDetector;
///
/// let detector = PeakDetector::default();
/// // Less than one second of data is never enough
/// assert!(detector.detect(&[0.0; 100], 130.0).is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PeakDetector {
    config: PeakDetectorConfig,
    bounds: RrBounds,
}

impl PeakDetector {
    pub fn new(config: PeakDetectorConfig, bounds: RrBounds) -> Self {
        PeakDetector { config, bounds }
    }

    /// R-peak sample indices in `window`, ascending.
    ///
    /// Requires more than one second of data; shorter windows, a non-positive
    /// sampling rate or a flat signal yield an empty result.
    pub fn detect(&self, window: &[f64], sampling_rate_hz: f64) -> Vec<usize> {
        if !(sampling_rate_hz > 0.0) || window.len() as f64 <= sampling_rate_hz {
            return Vec::new();
        }

        let envelope = self.envelope(window, sampling_rate_hz);
        let thresholds = match self.thresholds(&envelope, sampling_rate_hz) {
            Some(t) => t,
            None => return Vec::new(),
        };

        let n = window.len();
        let search = seconds_to_samples(self.config.search_window_s, sampling_rate_hz, 1);
        let radius = seconds_to_samples(self.config.relocation_radius_s, sampling_rate_hz, 0);
        let min_gap = seconds_to_samples(
            self.config.refractory_s.max(self.bounds.min_s),
            sampling_rate_hz,
            1,
        );

        let mut peaks: Vec<usize> = Vec::new();
        let mut i = 0;
        while i < n {
            if envelope[i] <= thresholds[i] {
                i += 1;
                continue;
            }

            let env_peak = argmax_in(&envelope, i, i + search).unwrap_or(i);
            let candidate =
                argmax_in(window, env_peak.saturating_sub(radius), env_peak + radius + 1)
                    .unwrap_or(env_peak);
            accept_candidate(&mut peaks, candidate, window, min_gap);

            // Skip the rest of this envelope lobe
            i = (i + search).max(env_peak + 1);
            while i < n && envelope[i] > thresholds[i] {
                i += 1;
            }
        }

        debug!("Detected {} R-peaks in {} samples", peaks.len(), n);
        peaks
    }

    /// RR intervals in seconds between successive peaks, filtered to the
    /// physiological bounds. Fewer than two peaks yield an empty list.
    pub fn rr_intervals(&self, peaks: &[usize], sampling_rate_hz: f64) -> Vec<f64> {
        rr_intervals(peaks, sampling_rate_hz, self.bounds)
    }

    /// Detect peaks and convert them to RR intervals in one call.
    pub fn detect_rr(&self, window: &[f64], sampling_rate_hz: f64) -> Vec<f64> {
        let peaks = self.detect(window, sampling_rate_hz);
        self.rr_intervals(&peaks, sampling_rate_hz)
    }

    /// Energy envelope after bandpass, differentiation, squaring and integration.
    pub fn envelope(&self, window: &[f64], sampling_rate_hz: f64) -> Vec<f64> {
        let hp_window = cutoff_window(sampling_rate_hz, self.config.low_cutoff_hz);
        let lp_window = cutoff_window(sampling_rate_hz, self.config.high_cutoff_hz);
        let integration =
            seconds_to_samples(self.config.integration_window_s, sampling_rate_hz, 1);

        let bandpassed = moving_average(&high_pass_moving_average(window, hp_window), lp_window);
        moving_average(&square(&first_difference(&bandpassed)), integration)
    }

    /// Per-sample threshold, or `None` when the envelope is flat.
    fn thresholds(&self, envelope: &[f64], sampling_rate_hz: f64) -> Option<Vec<f64>> {
        let max = envelope.iter().copied().fold(0.0_f64, f64::max);
        if !(max > FLAT_ENVELOPE) || !max.is_finite() {
            return None;
        }
        let floor = self.config.noise_floor_fraction * max;

        let thresholds = match self.config.threshold {
            ThresholdMode::RobustMad { k } => {
                let level = median(envelope) + k * median_abs_deviation(envelope);
                vec![level.max(floor); envelope.len()]
            }
            ThresholdMode::Adaptive { fraction, lookback_s } => {
                let lookback = seconds_to_samples(lookback_s, sampling_rate_hz, 1);
                trailing_max(envelope, lookback)
                    .into_iter()
                    .map(|local| (fraction * local).max(floor))
                    .collect()
            }
        };
        Some(thresholds)
    }
}

/// RR intervals in seconds between successive peak indices, keeping only those
/// inside `bounds`.
pub fn rr_intervals(peaks: &[usize], sampling_rate_hz: f64, bounds: RrBounds) -> Vec<f64> {
    if peaks.len() < 2 || !(sampling_rate_hz > 0.0) {
        return Vec::new();
    }
    let raw: Vec<f64> = peaks
        .windows(2)
        .map(|w| (w[1] as f64 - w[0] as f64) / sampling_rate_hz)
        .collect();
    filter_physiological(&raw, bounds)
}

/// Push `candidate` or merge it with the previous peak when they are closer
/// than `min_gap`; the larger original amplitude survives.
fn accept_candidate(peaks: &mut Vec<usize>, candidate: usize, signal: &[f64], min_gap: usize) {
    peaks.push(candidate);
    while peaks.len() >= 2 {
        let last = peaks[peaks.len() - 1];
        let prev = peaks[peaks.len() - 2];
        if last >= prev + min_gap {
            break;
        }
        let keep = if signal[last] > signal[prev] { last } else { prev };
        peaks.pop();
        if let Some(slot) = peaks.last_mut() {
            *slot = keep;
        }
    }
}

/// Moving-average window for a cutoff frequency: `rate / cutoff`, at least 3.
fn cutoff_window(sampling_rate_hz: f64, cutoff_hz: f64) -> usize {
    if cutoff_hz <= 0.0 {
        return 3;
    }
    let samples = (sampling_rate_hz / cutoff_hz).round();
    if samples.is_finite() && samples > 3.0 {
        samples as usize
    } else {
        3
    }
}

/// Maximum over the trailing `window` samples (inclusive) at every index.
fn trailing_max(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut candidates: VecDeque<usize> = VecDeque::new();
    for (i, &v) in values.iter().enumerate() {
        while let Some(&back) = candidates.back() {
            if values[back] <= v {
                candidates.pop_back();
            } else {
                break;
            }
        }
        candidates.push_back(i);
        while let Some(&front) = candidates.front() {
            if front + window <= i {
                candidates.pop_front();
            } else {
                break;
            }
        }
        out.push(candidates.front().map_or(v, |&idx| values[idx]));
    }
    out
}
