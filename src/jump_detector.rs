//! # Jump Detection
//!
//! Finds vertical jumps in a short trailing window of acceleration and estimates
//! their height from flight time.
//!
//! ## Method
//! 1. **Gravity removal**: single-pole high-pass (≈0.5 Hz), or plain mean removal
//!    when the filter is disabled
//! 2. **Smoothing**: short centred moving average
//! 3. **Threshold pairs**: a downward crossing of `-takeoff_threshold_g` (free fall
//!    reads ≈-1 g once gravity is removed) followed within the search horizon by a
//!    sample above `landing_threshold_g` (impact)
//! 4. **Fallback**: when no threshold pair survives, downward/upward zero crossings
//!    of the filtered signal with tighter flight bounds and a lower height ceiling
//!
//! Height follows from projectile motion: the body rises for `t/2` and falls for
//! `t/2`, so `h = g·t²/8`.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::AccelAxis;
use crate::filters::{demean, moving_average, seconds_to_samples, single_pole_high_pass};
use crate::{Acceleration, JumpEvent, JumpMethod};

/// Zero-crossing fallback constants. Bounds are deliberately tighter than the
/// primary method because zero crossings are a weaker signal.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ZeroCrossingConfig {
    pub enabled: bool,
    pub min_flight_s: f64,
    pub max_flight_s: f64,
    /// The signal must dip at least this far below zero between the crossings
    pub min_depth_g: f64,
    pub max_height_cm: f64,
}

/// Tunable constants of the jump detector.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JumpDetectorConfig {
    pub high_pass_enabled: bool,
    pub high_pass_cutoff_hz: f64,
    /// Centred moving-average window, samples
    pub smoothing_window: usize,
    pub takeoff_threshold_g: f64,
    pub landing_threshold_g: f64,
    /// Longest wait for a landing after a takeoff, seconds
    pub search_horizon_s: f64,
    pub min_flight_s: f64,
    pub max_flight_s: f64,
    pub min_height_cm: f64,
    pub max_height_cm: f64,
    pub gravity_m_s2: f64,
    pub fallback: ZeroCrossingConfig,
}

impl Default for JumpDetectorConfig {
    fn default() -> Self {
        JumpDetectorConfig {
            high_pass_enabled: true,
            high_pass_cutoff_hz: 0.5,
            smoothing_window: 3,
            takeoff_threshold_g: 0.5,
            landing_threshold_g: 0.5,
            search_horizon_s: 1.2,
            min_flight_s: 0.15,
            max_flight_s: 1.0,
            min_height_cm: 1.0,
            max_height_cm: 100.0,
            gravity_m_s2: 9.81,
            fallback: ZeroCrossingConfig {
                enabled: true,
                min_flight_s: 0.2,
                max_flight_s: 0.8,
                min_depth_g: 0.3,
                max_height_cm: 60.0,
            },
        }
    }
}

/// Free-fall height in centimeters for a flight time in seconds.
pub fn flight_height_cm(flight_seconds: f64, gravity_m_s2: f64) -> f64 {
    gravity_m_s2 * flight_seconds * flight_seconds / 8.0 * 100.0
}

/// Reduce tri-axial readings to a single vertical series.
pub fn vertical_series(samples: &[Acceleration], axis: AccelAxis) -> Vec<f64> {
    samples
        .iter()
        .map(|a| match axis {
            AccelAxis::X => a.x,
            AccelAxis::Y => a.y,
            AccelAxis::Z => a.z,
            AccelAxis::Magnitude => a.magnitude(),
        })
        .collect()
}

/// Stateless jump detector.
#[derive(Debug, Clone, Default)]
pub struct JumpDetector {
    config: JumpDetectorConfig,
}

impl JumpDetector {
    pub fn new(config: JumpDetectorConfig) -> Self {
        JumpDetector { config }
    }

    /// All jumps in a window of vertical acceleration (g), in order.
    pub fn detect(&self, window: &[f64], sampling_rate_hz: f64) -> Vec<JumpEvent> {
        let min_samples = seconds_to_samples(self.config.min_flight_s, sampling_rate_hz, 2);
        if !(sampling_rate_hz > 0.0) || window.len() < min_samples {
            return Vec::new();
        }

        let filtered = if self.config.high_pass_enabled {
            single_pole_high_pass(window, self.config.high_pass_cutoff_hz, sampling_rate_hz)
        } else {
            demean(window)
        };
        let signal = moving_average(&filtered, self.config.smoothing_window);

        let events = self.threshold_pairs(&signal, sampling_rate_hz);
        if !events.is_empty() || !self.config.fallback.enabled {
            return events;
        }

        let fallback = self.zero_crossing_pairs(&signal, sampling_rate_hz);
        if !fallback.is_empty() {
            debug!("Zero-crossing fallback found {} jump(s)", fallback.len());
        }
        fallback
    }

    /// Convenience wrapper taking raw tri-axial readings.
    pub fn detect_acceleration(
        &self,
        samples: &[Acceleration],
        axis: AccelAxis,
        sampling_rate_hz: f64,
    ) -> Vec<JumpEvent> {
        self.detect(&vertical_series(samples, axis), sampling_rate_hz)
    }

    fn threshold_pairs(&self, signal: &[f64], rate: f64) -> Vec<JumpEvent> {
        let n = signal.len();
        let takeoff_level = -self.config.takeoff_threshold_g.abs();
        let landing_level = self.config.landing_threshold_g.abs();
        let horizon = seconds_to_samples(self.config.search_horizon_s, rate, 1);

        let mut events = Vec::new();
        let mut i = 1;
        while i < n {
            let takeoff = signal[i] < takeoff_level && signal[i - 1] >= takeoff_level;
            if !takeoff {
                i += 1;
                continue;
            }

            let end = (i + horizon).min(n);
            match (i + 1..end).find(|&j| signal[j] > landing_level) {
                Some(landing) => {
                    let flight = (landing - i) as f64 / rate;
                    if flight >= self.config.min_flight_s && flight <= self.config.max_flight_s {
                        events.push(self.event(i, landing, flight, self.config.max_height_cm, JumpMethod::Threshold));
                    }
                    i = landing + 1;
                }
                None => i += 1,
            }
        }
        events
    }

    fn zero_crossing_pairs(&self, signal: &[f64], rate: f64) -> Vec<JumpEvent> {
        let fallback = &self.config.fallback;
        let n = signal.len();

        let mut events = Vec::new();
        let mut i = 1;
        while i < n {
            if !(signal[i - 1] >= 0.0 && signal[i] < 0.0) {
                i += 1;
                continue;
            }

            let Some(up) = (i + 1..n).find(|&j| signal[j - 1] < 0.0 && signal[j] >= 0.0) else {
                break;
            };
            let depth = signal[i..up].iter().copied().fold(0.0_f64, f64::min);
            let flight = (up - i) as f64 / rate;
            if flight >= fallback.min_flight_s
                && flight <= fallback.max_flight_s
                && depth <= -fallback.min_depth_g.abs()
            {
                events.push(self.event(i, up, flight, fallback.max_height_cm, JumpMethod::ZeroCrossing));
            }
            i = up + 1;
        }
        events
    }

    fn event(
        &self,
        takeoff_index: usize,
        landing_index: usize,
        flight_seconds: f64,
        max_height_cm: f64,
        method: JumpMethod,
    ) -> JumpEvent {
        let height = flight_height_cm(flight_seconds, self.config.gravity_m_s2);
        let ceiling = max_height_cm.max(self.config.min_height_cm);
        JumpEvent {
            takeoff_index,
            landing_index,
            flight_seconds,
            height_cm: height.clamp(self.config.min_height_cm, ceiling),
            method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f64 = 100.0;

    /// Vertical acceleration in g including gravity: rest, free fall, impact, rest.
    fn jump_trace(flight_s: f64) -> (Vec<f64>, usize) {
        let takeoff = RATE as usize;
        let flight = (flight_s * RATE).round() as usize;
        let mut trace = vec![1.0; takeoff];
        trace.extend(vec![0.0; flight]);
        trace.extend(vec![2.0; 5]);
        trace.extend(vec![1.0; 150]);
        (trace, takeoff)
    }

    #[test]
    fn test_clean_jump_yields_one_event() {
        let (trace, takeoff) = jump_trace(0.4);
        let events = JumpDetector::default().detect(&trace, RATE);

        assert_eq!(events.len(), 1);
        let event = events[0];
        assert_eq!(event.method, JumpMethod::Threshold);
        assert!((event.takeoff_index as i64 - takeoff as i64).abs() <= 1);
        assert!((event.flight_seconds - 0.4).abs() <= 0.02);

        let expected = 9.81 * 0.4 * 0.4 / 8.0 * 100.0;
        assert!((event.height_cm - expected).abs() < 2.0, "height {}", event.height_cm);
        assert!((event.height_cm - flight_height_cm(event.flight_seconds, 9.81)).abs() < 1e-9);
    }

    #[test]
    fn test_flight_outside_bounds_is_rejected() {
        for flight in [0.1, 1.5] {
            let (trace, _) = jump_trace(flight);
            let events = JumpDetector::default().detect(&trace, RATE);
            assert!(events.is_empty(), "flight {flight}s produced {events:?}");
        }
    }

    #[test]
    fn test_multiple_jumps_are_all_returned() {
        let (mut trace, _) = jump_trace(0.3);
        let (second, _) = jump_trace(0.5);
        trace.extend(second);

        let events = JumpDetector::default().detect(&trace, RATE);
        assert_eq!(events.len(), 2);
        assert!(events[0].landing_index < events[1].takeoff_index);
        assert!(events[1].height_cm > events[0].height_cm);
    }

    #[test]
    fn test_flat_and_short_windows() {
        let detector = JumpDetector::default();
        assert!(detector.detect(&vec![1.0; 800], RATE).is_empty());
        assert!(detector.detect(&[1.0, 0.0, 2.0], RATE).is_empty());
        assert!(detector.detect(&vec![1.0; 800], 0.0).is_empty());
    }

    #[test]
    fn test_zero_crossing_fallback() {
        // A shallow dip that never reaches the takeoff threshold
        let mut trace = vec![0.0; 100];
        trace.extend(vec![-0.4; 40]);
        trace.extend(vec![0.4; 10]);
        trace.extend(vec![0.0; 100]);

        let config = JumpDetectorConfig {
            high_pass_enabled: false,
            ..JumpDetectorConfig::default()
        };
        let events = JumpDetector::new(config.clone()).detect(&trace, RATE);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].method, JumpMethod::ZeroCrossing);
        assert!(events[0].height_cm <= config.fallback.max_height_cm);

        let disabled = JumpDetectorConfig {
            fallback: ZeroCrossingConfig {
                enabled: false,
                ..config.fallback.clone()
            },
            ..config
        };
        assert!(JumpDetector::new(disabled).detect(&trace, RATE).is_empty());
    }

    #[test]
    fn test_height_is_clamped() {
        let config = JumpDetectorConfig {
            max_height_cm: 50.0,
            ..JumpDetectorConfig::default()
        };
        let (trace, _) = jump_trace(0.9);
        let events = JumpDetector::new(config).detect(&trace, RATE);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].height_cm, 50.0);
    }

    #[test]
    fn test_magnitude_axis() {
        let samples: Vec<Acceleration> = jump_trace(0.4)
            .0
            .into_iter()
            .map(|g| Acceleration::new(0.0, g * 0.6, g * 0.8))
            .collect();
        let events =
            JumpDetector::default().detect_acceleration(&samples, AccelAxis::Magnitude, RATE);
        assert_eq!(events.len(), 1);
    }
}
