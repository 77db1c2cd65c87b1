//! # HRV Tracker Core Library
//!
//! This library turns raw wearable-sensor streams into derived physiological
//! signals: heartbeat timing from a single-lead ECG, heart-rate-variability
//! statistics over rolling windows, and vertical-jump events from a
//! tri-axial accelerometer.
//!
//! ## Design Philosophy
//!
//! ### Streaming First
//! - **Bounded memory**: every retained series lives in a [`rolling_buffer::RollingBuffer`]
//!   whose capacity is `sampling_rate × window_seconds`
//! - **No re-requests**: samples arrive once, in batches, and old data is evicted
//! - **Cold starts are normal**: short or empty windows yield empty/zero results, never errors
//!
//! ### Pure Computation, Thin Scheduling
//! - [`peak_detector`], [`hrv`] and [`jump_detector`] are stateless functions of
//!   their input window and configuration
//! - [`ingest::StreamIngestManager`] is the single writer of all buffers and hands
//!   detectors owned snapshot copies
//! - [`robust::RobustRecalculationScheduler`] runs the long-window HRV loop on a
//!   tokio task and exposes progress through a watch channel
//!
//! ### Data Flow
//! 1. **Ingest**: sensor batch → de-mean → clamp → smooth → display / HRV / robust buffers
//! 2. **Live metric**: once per second of new data, detect beats and compute an [`HrvSnapshot`]
//! 3. **Robust metric**: a background task recomputes a 2-minute snapshot every 10 s
//! 4. **Jumps**: acceleration batches flow into a separate buffer and the [`jump_detector`]
//!
//! ## Core Types
//!
//! - [`Sample`]: one stream value with its monotonic source time
//! - [`Acceleration`]: one tri-axial accelerometer reading in g
//! - [`HrvSnapshot`]: immutable HRV statistics for one window
//! - [`JumpEvent`]: a detected takeoff/landing pair with estimated height

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

// Module declarations
pub mod config;
pub mod filters;
pub mod hrv;
pub mod ingest;
pub mod jump_detector;
pub mod peak_detector;
pub mod report;
pub mod robust;
pub mod rolling_buffer;
pub mod synthetic;

#[cfg(test)]
mod tests;

/// A single stream value stamped with the monotonic time it was sampled.
///
/// Samples are immutable once created. The source time is reconstructed by
/// the ingest layer from batch arrival and the nominal sampling rate, so it
/// is always non-decreasing within a session.
///
/// # Example
/// ```
/// use hrv_tracker_lib::Sample;
/// use std::time::Instant;
///
/// let sample = Sample::new(0.42, Instant::now());
/// assert_eq!(sample.value, 0.42);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    /// Sample value (millivolt-equivalent for ECG, g for acceleration)
    pub value: f64,
    /// Monotonic time at which the sensor produced this value
    pub source_time: Instant,
}

impl Sample {
    pub fn new(value: f64, source_time: Instant) -> Self {
        Sample { value, source_time }
    }
}

/// One tri-axial accelerometer reading, in units of g.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Acceleration {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Acceleration { x, y, z }
    }

    /// Euclidean norm of the reading. Reads ≈1 g at rest and ≈0 g in free fall
    /// regardless of how the sensor is worn.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Physiological channel a raw batch belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Single-lead ECG voltage
    Ecg,
    /// Accelerometer already reduced to one vertical series
    Acceleration,
}

/// Where the RR intervals behind a snapshot came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RrSource {
    /// Beat-to-beat intervals reported by the sensor hardware
    Hardware,
    /// Intervals derived locally by the peak detector
    Detected,
}

/// Heart-rate-variability statistics computed over one window of RR intervals.
///
/// A value object: once produced it is never mutated. It records the window
/// length and the RR source so consumers can tell a live 30 s metric from a
/// 2-minute robust one.
///
/// # Example
/// ```
/// use hrv_tracker_lib::{HrvSnapshot, RrSource};
///
/// let snapshot = HrvSnapshot::from_rr(&[0.8, 0.8, 0.8, 0.8], 30.0, RrSource::Detected);
/// assert!((snapshot.mean_hr_bpm - 75.0).abs() < 1e-9);
/// assert_eq!(snapshot.beat_count, 5);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HrvSnapshot {
    /// Root mean square of successive differences, in milliseconds
    pub rmssd_ms: f64,
    /// Standard deviation of RR intervals, in milliseconds
    pub sdnn_ms: f64,
    /// Mean heart rate in beats per minute
    pub mean_hr_bpm: f64,
    /// Successive differences greater than 50 ms
    pub nn50: usize,
    /// NN50 as a percentage of all successive differences
    pub pnn50: f64,
    /// Beats spanned by the RR intervals (intervals + 1, or 0)
    pub beat_count: usize,
    /// Length of the signal window the intervals were taken from
    pub window_seconds: f64,
    /// Origin of the RR intervals
    pub source: RrSource,
    /// Wall-clock time the snapshot was computed
    pub computed_at: DateTime<Utc>,
}

/// How a jump event was found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpMethod {
    /// Takeoff/landing threshold crossing pair
    Threshold,
    /// Zero-mean crossing pair (fallback, conservative bounds)
    ZeroCrossing,
}

/// A detected vertical jump.
///
/// Indices are sample positions in the window handed to the detector; the
/// ingest manager rebases them to absolute stream positions before storing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JumpEvent {
    pub takeoff_index: usize,
    pub landing_index: usize,
    /// Time between takeoff and landing
    pub flight_seconds: f64,
    /// Estimated jump height from `g·t²/8`
    pub height_cm: f64,
    pub method: JumpMethod,
}
