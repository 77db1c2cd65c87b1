//! # Detector Pipeline Tests
//!
//! Synthetic ECG and accelerometer traces fed straight into the stateless
//! detectors, checked against the generator's ground truth.

use crate::config::Config;
use crate::hrv::{self, RrBounds};
use crate::ingest::preprocess;
use crate::jump_detector::JumpDetector;
use crate::peak_detector::PeakDetector;
use crate::synthetic::{self, EcgProfile, ScriptedJump};
use crate::{HrvSnapshot, JumpMethod, RrSource};

/// Detected beats line up with the generated R-peaks.
#[test]
fn synthetic_ecg_beats_are_found() {
    let profile = EcgProfile::default();
    let trace = synthetic::ecg(&profile, 30.0);
    let peaks = PeakDetector::default().detect(&trace.samples, profile.sampling_rate_hz);

    let expected = trace.beat_times.len() as i64;
    assert!(
        (peaks.len() as i64 - expected).abs() <= 1,
        "found {} peaks, expected {}",
        peaks.len(),
        expected
    );

    // Every detected peak sits on a true beat
    for &peak in &peaks {
        let t = peak as f64 / profile.sampling_rate_hz;
        let nearest = trace
            .beat_times
            .iter()
            .map(|b| (b - t).abs())
            .fold(f64::INFINITY, f64::min);
        assert!(nearest <= 0.02, "peak at {t:.3}s is {nearest:.3}s from a beat");
    }
}

/// Heart rate from detected beats matches the generator, at several rates.
#[test]
fn detected_heart_rate_tracks_profile() {
    for (bpm, rate) in [(55.0, 130.0), (75.0, 130.0), (110.0, 250.0)] {
        let profile = EcgProfile {
            heart_rate_bpm: bpm,
            sampling_rate_hz: rate,
            ..EcgProfile::default()
        };
        let trace = synthetic::ecg(&profile, 40.0);
        let rr = PeakDetector::default().detect_rr(&trace.samples, rate);
        let snapshot = HrvSnapshot::from_rr(&rr, 40.0, RrSource::Detected);

        assert!(
            (snapshot.mean_hr_bpm - bpm).abs() < 2.0,
            "{bpm} BPM at {rate} Hz measured as {:.1}",
            snapshot.mean_hr_bpm
        );
        assert!(snapshot.rmssd_ms > 0.0);
    }
}

/// Batch-wise preprocessing as done on ingest does not break detection.
#[test]
fn preprocessed_batches_still_detect_beats() {
    let config = Config::default();
    let profile = EcgProfile::default();
    let trace = synthetic::ecg(&profile, 20.0);

    let processed: Vec<f64> = trace
        .samples
        .chunks(65)
        .flat_map(|batch| preprocess(batch, &config.ecg.preprocess))
        .collect();
    assert_eq!(processed.len(), trace.samples.len());

    let peaks = PeakDetector::default().detect(&processed, profile.sampling_rate_hz);
    let expected = trace.beat_times.len() as i64;
    assert!((peaks.len() as i64 - expected).abs() <= 1);
}

/// Detected HRV agrees with HRV from the true RR sequence.
#[test]
fn detected_hrv_close_to_ground_truth() {
    let profile = EcgProfile::default();
    let trace = synthetic::ecg(&profile, 60.0);

    let detected = PeakDetector::default().detect_rr(&trace.samples, profile.sampling_rate_hz);
    let truth = hrv::filter_physiological(&trace.rr_intervals, RrBounds::default());

    let hr_error = (hrv::mean_hr_bpm(&detected) - hrv::mean_hr_bpm(&truth)).abs();
    assert!(hr_error < 1.0, "HR error {hr_error}");
    // Quantization to the sample grid adds a few ms of jitter at most
    let sdnn_error = (hrv::sdnn_ms(&detected) - hrv::sdnn_ms(&truth)).abs();
    assert!(sdnn_error < 8.0, "SDNN error {sdnn_error}");
}

/// Scripted jumps are recovered with their flight time and height.
#[test]
fn synthetic_jumps_are_found() {
    let config = Config::default();
    let rate = config.accel.sampling_rate_hz;
    let jumps = [
        ScriptedJump {
            takeoff_s: 1.5,
            flight_s: 0.35,
        },
        ScriptedJump {
            takeoff_s: 4.0,
            flight_s: 0.5,
        },
    ];
    let trace = synthetic::jump_trace(rate, 7.0, &jumps);

    let events = JumpDetector::new(config.jump.clone()).detect_acceleration(&trace, config.accel.vertical_axis, rate);
    assert_eq!(events.len(), 2, "{events:?}");
    for (event, jump) in events.iter().zip(&jumps) {
        assert_eq!(event.method, JumpMethod::Threshold);
        assert!((event.flight_seconds - jump.flight_s).abs() <= 0.03);
        let expected_cm = 9.81 * jump.flight_s * jump.flight_s / 8.0 * 100.0;
        assert!((event.height_cm - expected_cm).abs() < 3.0);
    }
}
