//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the hrv-tracker.toml file.
//! It provides a centralized way to configure sampling rates, window lengths, detector
//! constants and scheduler timing.
//!
//! Every numeric constant of the beat and jump detectors is a field here rather than a
//! literal in the algorithms, so deployments can tune thresholds against their own
//! sensor without touching code.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::hrv::RrBounds;
use crate::jump_detector::JumpDetectorConfig;
use crate::peak_detector::PeakDetectorConfig;
use crate::RrSource;

/// Default configuration file name, resolved relative to the working directory
pub const CONFIG_FILE: &str = "hrv-tracker.toml";

/// One week of per-second live metrics
pub const MAX_HISTORY_LIMIT: usize = 7 * 86_400;

/// Errors raised while reading, parsing or validating a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config format: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Application configuration loaded from hrv-tracker.toml
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// ECG stream and its rolling windows
    pub ecg: EcgConfig,
    /// Accelerometer stream and jump window
    pub accel: AccelConfig,
    /// Session timing shared by both channels
    pub session: SessionConfig,
    /// R-peak detector constants
    pub peaks: PeakDetectorConfig,
    /// Physiological RR bounds and NN50 threshold
    pub hrv: HrvConfig,
    /// Robust (long window) recomputation loop
    pub robust: RobustConfig,
    /// Jump detector constants
    pub jump: JumpDetectorConfig,
}

/// Per-batch preprocessing applied by the ingest manager before buffering.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PreprocessConfig {
    /// Subtract the batch mean (removes DC offset per batch)
    pub demean: bool,
    /// Clamp every value to ±limit; `None` disables clamping
    pub clamp_limit: Option<f64>,
    /// Centred moving-average window; 1 disables smoothing
    pub smoothing_window: usize,
}

/// ECG channel configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EcgConfig {
    /// Nominal sampling rate in Hz
    pub sampling_rate_hz: f64,
    /// Window shown on screen, seconds
    pub display_window_s: f64,
    /// Window used for the live HRV metric, seconds
    pub hrv_window_s: f64,
    /// Window used for the robust HRV snapshot, seconds
    pub robust_window_s: f64,
    pub preprocess: PreprocessConfig,
}

/// Which accelerometer axis is treated as vertical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelAxis {
    X,
    Y,
    Z,
    /// Orientation-independent norm of all three axes
    Magnitude,
}

/// Accelerometer channel configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccelConfig {
    /// Nominal sampling rate in Hz
    pub sampling_rate_hz: f64,
    /// Trailing window handed to the jump detector, seconds
    pub jump_window_s: f64,
    pub vertical_axis: AccelAxis,
    pub preprocess: PreprocessConfig,
}

/// Session timing configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Seconds after session start excluded from HRV and robust windows
    pub stabilization_s: f64,
    /// Seconds of new data between live recomputations
    pub live_interval_s: f64,
    /// Arrival later than the nominal batch end by this much is flagged as a gap
    pub gap_tolerance_s: f64,
    /// Maximum live metrics retained in the session history
    pub history_limit: usize,
}

/// Preferred origin of RR intervals when computing HRV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RrSourcePreference {
    /// Only sensor-reported intervals
    Hardware,
    /// Only locally detected intervals
    Detected,
    /// Sensor-reported when at least two are available, detected otherwise
    PreferHardware,
}

impl RrSourcePreference {
    /// Pick the RR sequence to compute HRV from. `detect` only runs when the
    /// detected intervals are actually needed.
    pub fn select<F>(self, hardware: Vec<f64>, detect: F) -> (Vec<f64>, RrSource)
    where
        F: FnOnce() -> Vec<f64>,
    {
        match self {
            RrSourcePreference::Hardware => (hardware, RrSource::Hardware),
            RrSourcePreference::Detected => (detect(), RrSource::Detected),
            RrSourcePreference::PreferHardware if hardware.len() >= 2 => (hardware, RrSource::Hardware),
            RrSourcePreference::PreferHardware => (detect(), RrSource::Detected),
        }
    }
}

/// HRV statistics configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HrvConfig {
    /// Shortest plausible RR interval, seconds
    pub rr_min_s: f64,
    /// Longest plausible RR interval, seconds
    pub rr_max_s: f64,
    /// Successive difference that counts towards NN50, seconds
    pub nn50_threshold_s: f64,
    /// RR origin for the live per-second metric
    pub live_source: RrSourcePreference,
}

impl HrvConfig {
    pub fn rr_bounds(&self) -> RrBounds {
        RrBounds {
            min_s: self.rr_min_s,
            max_s: self.rr_max_s,
        }
    }
}

/// Robust recomputation loop configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RobustConfig {
    /// Poll period while the robust buffer is still filling
    pub poll_interval_ms: u64,
    /// Recompute period once the first snapshot exists
    pub recompute_interval_ms: u64,
    /// RR origin treated as authoritative for the robust snapshot
    pub source: RrSourcePreference,
}

impl RobustConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn recompute_interval(&self) -> Duration {
        Duration::from_millis(self.recompute_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ecg: EcgConfig {
                sampling_rate_hz: 130.0, // Polar H10 ECG rate
                display_window_s: 20.0,
                hrv_window_s: 30.0,
                robust_window_s: 120.0,
                preprocess: PreprocessConfig {
                    demean: true,
                    clamp_limit: Some(3.0),
                    smoothing_window: 3,
                },
            },
            accel: AccelConfig {
                sampling_rate_hz: 100.0,
                jump_window_s: 8.0,
                vertical_axis: AccelAxis::Magnitude,
                preprocess: PreprocessConfig {
                    demean: false, // the jump detector high-passes its own window
                    clamp_limit: Some(16.0),
                    smoothing_window: 1,
                },
            },
            session: SessionConfig {
                stabilization_s: 10.0,
                live_interval_s: 1.0,
                gap_tolerance_s: 1.0,
                history_limit: 86_400, // one day of per-second metrics
            },
            peaks: PeakDetectorConfig::default(),
            hrv: HrvConfig {
                rr_min_s: 0.3,
                rr_max_s: 2.0,
                nn50_threshold_s: 0.05,
                live_source: RrSourcePreference::PreferHardware,
            },
            robust: RobustConfig {
                poll_interval_ms: 1_000,
                recompute_interval_ms: 10_000,
                source: RrSourcePreference::PreferHardware,
            },
            jump: JumpDetectorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from hrv-tracker.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::try_load_from_path(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.as_ref().display());
                config
            }
            Err(ConfigError::Io(_)) => {
                info!("No config file found, using default configuration");
                Self::default()
            }
            Err(e) => {
                warn!("{}; using default configuration", e);
                Self::default()
            }
        }
    }

    /// Load and validate configuration, surfacing every failure to the caller.
    pub fn try_load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str::<Config>(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save current configuration to hrv-tracker.toml
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to_path(CONFIG_FILE)
    }

    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Reject values the algorithms cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("ecg.sampling_rate_hz", self.ecg.sampling_rate_hz),
            ("ecg.display_window_s", self.ecg.display_window_s),
            ("ecg.hrv_window_s", self.ecg.hrv_window_s),
            ("ecg.robust_window_s", self.ecg.robust_window_s),
            ("accel.sampling_rate_hz", self.accel.sampling_rate_hz),
            ("accel.jump_window_s", self.accel.jump_window_s),
            ("session.live_interval_s", self.session.live_interval_s),
            ("hrv.rr_min_s", self.hrv.rr_min_s),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }

        let non_negative = [
            ("session.stabilization_s", self.session.stabilization_s),
            ("session.gap_tolerance_s", self.session.gap_tolerance_s),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be finite and not negative, got {value}")));
            }
        }
        if !(1..=MAX_HISTORY_LIMIT).contains(&self.session.history_limit) {
            return Err(ConfigError::Invalid(format!(
                "session.history_limit must be between 1 and {MAX_HISTORY_LIMIT}, got {}",
                self.session.history_limit
            )));
        }
        if self.hrv.rr_max_s <= self.hrv.rr_min_s {
            return Err(ConfigError::Invalid(format!(
                "hrv.rr_max_s ({}) must exceed hrv.rr_min_s ({})",
                self.hrv.rr_max_s, self.hrv.rr_min_s
            )));
        }
        if self.jump.max_flight_s <= self.jump.min_flight_s {
            return Err(ConfigError::Invalid("jump.max_flight_s must exceed jump.min_flight_s".into()));
        }
        if self.robust.poll_interval_ms == 0 || self.robust.recompute_interval_ms == 0 {
            return Err(ConfigError::Invalid("robust intervals must be non-zero".into()));
        }
        for (name, pre) in [("ecg", &self.ecg.preprocess), ("accel", &self.accel.preprocess)] {
            if pre.smoothing_window == 0 {
                return Err(ConfigError::Invalid(format!("{name}.preprocess.smoothing_window must be at least 1")));
            }
        }
        Ok(())
    }
}
