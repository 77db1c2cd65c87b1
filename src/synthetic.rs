//! # Synthetic Sensor Model
//!
//! Deterministic stand-in for a wearable sensor when no hardware is attached. It
//! produces an ECG trace, the matching sensor-reported RR intervals, and
//! accelerometer readings containing scripted jumps.
//!
//! ## Model Characteristics
//!
//! ### ECG
//! - **Beat timing**: mean RR from the configured heart rate, modulated by a slow
//!   sinusoid (respiratory sinus arrhythmia) so HRV metrics are non-zero
//! - **Waveform**: sum of Gaussian P, Q, R, S and T components per beat
//! - **Baseline wander**: low-frequency sine, removed downstream by the filters
//!
//! ### Accelerometer
//! - **Rest**: 1 g on the vertical axis
//! - **Flight**: 0 g (free fall)
//! - **Landing**: a short 2.5 g impact spike
//!
//! No randomness is involved: the same profile always yields the same samples,
//! which keeps tests and demo output reproducible.

use std::f64::consts::TAU;

use crate::Acceleration;

/// Parameters of the synthetic ECG.
#[derive(Debug, Clone, PartialEq)]
pub struct EcgProfile {
    pub sampling_rate_hz: f64,
    pub heart_rate_bpm: f64,
    /// Peak RR deviation from the mean, seconds
    pub rr_modulation_s: f64,
    /// Modulation period in beats
    pub modulation_period_beats: f64,
    pub r_amplitude_mv: f64,
    pub wander_amplitude_mv: f64,
    /// Time of the first R-peak, seconds
    pub first_beat_s: f64,
}

impl Default for EcgProfile {
    fn default() -> Self {
        EcgProfile {
            sampling_rate_hz: 130.0,
            heart_rate_bpm: 75.0,
            rr_modulation_s: 0.04,
            modulation_period_beats: 5.3,
            r_amplitude_mv: 1.2,
            wander_amplitude_mv: 0.15,
            first_beat_s: 0.4,
        }
    }
}

/// A generated ECG recording with its ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticEcg {
    pub samples: Vec<f64>,
    /// R-peak times in seconds
    pub beat_times: Vec<f64>,
    /// RR intervals between consecutive beats, seconds
    pub rr_intervals: Vec<f64>,
}

/// (offset from R in seconds, amplitude relative to R, width sigma in seconds)
const WAVES: [(f64, f64, f64); 5] = [
    (-0.16, 0.10, 0.025), // P
    (-0.03, -0.10, 0.008), // Q
    (0.0, 1.0, 0.010),    // R
    (0.03, -0.20, 0.008), // S
    (0.25, 0.22, 0.040),  // T
];

/// Generate `duration_s` seconds of ECG for `profile`.
pub fn ecg(profile: &EcgProfile, duration_s: f64) -> SyntheticEcg {
    let rr_intervals = rr_sequence(profile, duration_s);
    let mut beat_times = Vec::with_capacity(rr_intervals.len() + 1);
    let mut t = profile.first_beat_s;
    beat_times.push(t);
    for rr in &rr_intervals {
        t += rr;
        beat_times.push(t);
    }
    beat_times.retain(|&b| b < duration_s);
    let rr_intervals: Vec<f64> = beat_times.windows(2).map(|w| w[1] - w[0]).collect();

    let rate = profile.sampling_rate_hz;
    let n = (rate * duration_s).max(0.0) as usize;
    let mut samples = Vec::with_capacity(n);
    let mut first_relevant = 0;
    for i in 0..n {
        let t = i as f64 / rate;
        let mut value = profile.wander_amplitude_mv * (TAU * 0.2 * t).sin();

        while first_relevant < beat_times.len() && beat_times[first_relevant] < t - 0.5 {
            first_relevant += 1;
        }
        for &beat in beat_times[first_relevant..].iter().take_while(|&&b| b < t + 0.5) {
            for (offset, amplitude, sigma) in WAVES {
                let z = (t - beat - offset) / sigma;
                value += profile.r_amplitude_mv * amplitude * (-0.5 * z * z).exp();
            }
        }
        samples.push(value);
    }

    SyntheticEcg {
        samples,
        beat_times,
        rr_intervals,
    }
}

/// RR intervals covering `duration_s`, mean `60 / heart_rate_bpm`.
pub fn rr_sequence(profile: &EcgProfile, duration_s: f64) -> Vec<f64> {
    if profile.heart_rate_bpm <= 0.0 {
        return Vec::new();
    }
    let mean_rr = 60.0 / profile.heart_rate_bpm;
    let mut rr = Vec::new();
    let mut elapsed = profile.first_beat_s;
    let mut beat = 0.0;
    while elapsed < duration_s {
        let phase = TAU * beat / profile.modulation_period_beats.max(1.0);
        let interval = mean_rr + profile.rr_modulation_s * phase.sin();
        rr.push(interval);
        elapsed += interval;
        beat += 1.0;
    }
    rr
}

/// One scripted jump: takeoff time and flight duration, seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptedJump {
    pub takeoff_s: f64,
    pub flight_s: f64,
}

/// Accelerometer readings at `sampling_rate_hz` with the sensor's vertical along z.
pub fn jump_trace(sampling_rate_hz: f64, duration_s: f64, jumps: &[ScriptedJump]) -> Vec<Acceleration> {
    let n = (sampling_rate_hz * duration_s).max(0.0) as usize;
    let impact_s = 0.05;
    (0..n)
        .map(|i| {
            let t = i as f64 / sampling_rate_hz;
            let mut vertical = 1.0;
            for jump in jumps {
                let landing = jump.takeoff_s + jump.flight_s;
                if t >= jump.takeoff_s && t < landing {
                    vertical = 0.0;
                } else if t >= landing && t < landing + impact_s {
                    vertical = 2.5;
                }
            }
            // Small lateral sway so the horizontal axes are not identically zero
            let sway = 0.02 * (TAU * 1.3 * t).sin();
            Acceleration::new(sway, -sway, vertical)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hrv;

    #[test]
    fn test_rr_sequence_mean_matches_heart_rate() {
        let profile = EcgProfile::default();
        let rr = rr_sequence(&profile, 300.0);
        let hr = hrv::mean_hr_bpm(&rr);
        assert!((hr - 75.0).abs() < 0.5, "mean HR {hr}");
        assert!(hrv::rmssd_ms(&rr) > 10.0);
    }

    #[test]
    fn test_ecg_has_expected_length_and_beats() {
        let profile = EcgProfile::default();
        let trace = ecg(&profile, 10.0);
        assert_eq!(trace.samples.len(), 1300);
        assert_eq!(trace.rr_intervals.len(), trace.beat_times.len() - 1);
        assert!((11..=13).contains(&trace.beat_times.len()));
        assert!(trace.beat_times.iter().all(|&b| b < 10.0));

        // The R-wave is the tallest deflection
        let max = trace.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert!(max > profile.r_amplitude_mv * 0.9);
    }

    #[test]
    fn test_jump_trace_phases() {
        let jumps = [ScriptedJump {
            takeoff_s: 1.0,
            flight_s: 0.4,
        }];
        let trace = jump_trace(100.0, 3.0, &jumps);
        assert_eq!(trace.len(), 300);
        assert_eq!(trace[50].z, 1.0);
        assert_eq!(trace[120].z, 0.0);
        assert_eq!(trace[142].z, 2.5);
        assert_eq!(trace[200].z, 1.0);
    }

    #[test]
    fn test_non_positive_heart_rate() {
        let profile = EcgProfile {
            heart_rate_bpm: 0.0,
            ..EcgProfile::default()
        };
        assert!(rr_sequence(&profile, 10.0).is_empty());
        assert!(ecg(&profile, 2.0).rr_intervals.is_empty());
    }
}
