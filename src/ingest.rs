//! # Stream Ingest
//!
//! [`StreamIngestManager`] is the single writer of every rolling buffer. Sensor
//! batches are preprocessed, time-stamped and appended here; detectors only ever
//! see owned snapshot copies, so a long computation can never observe a buffer
//! mid-update.
//!
//! ## ECG path
//! 1. Replace non-finite values, then de-mean, clamp and smooth the batch
//! 2. Reconstruct per-sample source times from the arrival time and nominal rate
//! 3. Append to the display buffer; append to the HRV and robust buffers only
//!    once the session is past its stabilization period
//! 4. After every `live_interval` of new samples: detect beats on the display
//!    window, compute the live [`HrvSnapshot`], record it in the history and
//!    publish a fresh [`RobustWindow`] for the background scheduler
//!
//! ## Accelerometer path
//! Tri-axial readings are reduced to one vertical series and kept in a short
//! trailing window. Jump detection runs on the same cadence as the live metric;
//! events are rebased to absolute stream positions and each physical jump is
//! recorded once even though it stays visible across several windows.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::config::{Config, PreprocessConfig};
use crate::filters::{clamp_all, demean, mean, moving_average, seconds_to_samples};
use crate::jump_detector::{vertical_series, JumpDetector};
use crate::peak_detector::PeakDetector;
use crate::robust::{
    RobustCalculationState, RobustCalculator, RobustRecalculationScheduler, RobustWindow, SchedulerError,
};
use crate::rolling_buffer::{window_capacity, RollingBuffer};
use crate::{Acceleration, Channel, HrvSnapshot, JumpEvent, Sample};

/// Timing or value anomaly noticed while ingesting a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    /// The batch arrived earlier than the previous one
    NonMonotonic,
    /// The batch arrived later than its nominal end plus the gap tolerance
    Gap { seconds: f64 },
    /// Non-finite values replaced before buffering
    NonFinite { count: usize },
}

/// Shortest RR interval (300 BPM) the hardware RR buffer is sized for.
const FASTEST_RR_S: f64 = 0.2;

/// Outcome of one append call.
#[derive(Clone, Debug, PartialEq)]
pub struct IngestReport {
    pub channel: Channel,
    /// Samples appended to the channel's buffers
    pub accepted: usize,
    pub quality: Vec<DataQuality>,
    /// A live recomputation ran during this append
    pub recomputed: bool,
    /// Jump events recorded during this append
    pub new_jumps: usize,
}

impl IngestReport {
    fn empty(channel: Channel) -> Self {
        IngestReport {
            channel,
            accepted: 0,
            quality: Vec::new(),
            recomputed: false,
            new_jumps: 0,
        }
    }
}

/// Receives notifications from the ingest manager. Every hook defaults to a no-op.
pub trait IngestObserver: Send {
    fn on_live_metric(&mut self, _snapshot: &HrvSnapshot) {}

    fn on_jump_events(&mut self, _events: &[JumpEvent]) {}

    fn on_data_quality(&mut self, _channel: Channel, _issue: &DataQuality) {}
}

/// One exported display sample, time relative to session start.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportedSample {
    pub t_seconds: f64,
    pub value: f64,
}

/// Everything a session has produced so far, ready for serialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_id: u64,
    pub display_window: Vec<ExportedSample>,
    /// Display-window indices of detected R-peaks
    pub detected_beats: Vec<usize>,
    pub hrv_history: Vec<HrvSnapshot>,
    pub latest_snapshot: Option<HrvSnapshot>,
    pub robust: RobustCalculationState,
    pub jump_events: Vec<JumpEvent>,
}

/// Reconstructs per-sample source times for one channel.
#[derive(Debug)]
struct StreamClock {
    period: Duration,
    last_sample: Option<Instant>,
    last_arrival: Option<Instant>,
}

impl StreamClock {
    fn new(sampling_rate_hz: f64) -> Self {
        StreamClock {
            period: seconds(1.0 / sampling_rate_hz),
            last_sample: None,
            last_arrival: None,
        }
    }

    /// Times for a batch of `n` samples whose last sample arrived at `arrival`.
    ///
    /// Samples continue one period after the previous batch. A late batch
    /// re-anchors the clock so its last sample lands on the arrival time; an
    /// early (out-of-order) batch keeps the nominal timeline. Either way the
    /// returned times never go backwards.
    fn stamp(&mut self, n: usize, arrival: Instant, gap_tolerance: Duration) -> (Vec<Instant>, Option<DataQuality>) {
        if n == 0 {
            return (Vec::new(), None);
        }
        let span = offset(self.period, n - 1).unwrap_or(Duration::MAX);
        let anchored = arrival.checked_sub(span).unwrap_or(arrival);

        let mut issue = None;
        let first = match self.last_sample {
            None => anchored,
            Some(last) => {
                let nominal = last.checked_add(self.period).unwrap_or(last);
                // Deadlines past the representable range never count as a gap
                let expected_end = nominal.checked_add(span);
                let deadline = expected_end.and_then(|end| end.checked_add(gap_tolerance));
                if self.last_arrival.map_or(false, |prev| arrival < prev) {
                    issue = Some(DataQuality::NonMonotonic);
                    nominal
                } else if let Some(end) = expected_end.filter(|_| deadline.map_or(false, |d| arrival > d)) {
                    issue = Some(DataQuality::Gap {
                        seconds: arrival.duration_since(end).as_secs_f64(),
                    });
                    anchored.max(nominal)
                } else {
                    nominal
                }
            }
        };

        let mut times = Vec::with_capacity(n);
        let mut time = first;
        for i in 0..n {
            if let Some(next) = offset(self.period, i).and_then(|d| first.checked_add(d)) {
                time = next;
            }
            times.push(time);
        }
        self.last_sample = times.last().copied();
        self.last_arrival = Some(self.last_arrival.map_or(arrival, |prev| prev.max(arrival)));
        (times, issue)
    }

    fn reset(&mut self) {
        self.last_sample = None;
        self.last_arrival = None;
    }
}

/// `period × i`, or `None` when it does not fit in a `Duration`.
fn offset(period: Duration, i: usize) -> Option<Duration> {
    u32::try_from(i).ok().and_then(|i| period.checked_mul(i))
}

/// Seconds to a `Duration`; negative, non-finite or overflowing input maps to zero.
fn seconds(s: f64) -> Duration {
    Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO)
}

/// Replace NaN/inf with the mean of the finite values. Returns the count replaced.
fn sanitize(raw: &[f64]) -> (Vec<f64>, usize) {
    let finite: Vec<f64> = raw.iter().copied().filter(|v| v.is_finite()).collect();
    let replaced = raw.len() - finite.len();
    if replaced == 0 {
        return (raw.to_vec(), 0);
    }
    let fill = mean(&finite);
    let values = raw.iter().map(|&v| if v.is_finite() { v } else { fill }).collect();
    (values, replaced)
}

/// De-mean, clamp and smooth one batch according to `settings`.
pub fn preprocess(batch: &[f64], settings: &PreprocessConfig) -> Vec<f64> {
    let mut values = if settings.demean { demean(batch) } else { batch.to_vec() };
    if let Some(limit) = settings.clamp_limit {
        values = clamp_all(&values, limit);
    }
    moving_average(&values, settings.smoothing_window)
}

/// Owns every buffer of a recording session and drives the detectors.
pub struct StreamIngestManager {
    config: Config,
    peak_detector: PeakDetector,
    jump_detector: JumpDetector,

    session_id: u64,
    session_start: Option<Instant>,

    ecg_clock: StreamClock,
    display: RollingBuffer<Sample>,
    hrv_window: RollingBuffer<Sample>,
    robust_window: RollingBuffer<Sample>,
    ecg_pending: usize,

    /// Sensor-reported RR intervals (seconds), stamped with their beat time
    hardware_rr: RollingBuffer<Sample>,

    accel_clock: StreamClock,
    accel_window: RollingBuffer<f64>,
    accel_pending: usize,
    jump_events: Vec<JumpEvent>,

    detected_beats: Vec<usize>,
    live: Option<HrvSnapshot>,
    history: RollingBuffer<HrvSnapshot>,

    observers: Vec<Box<dyn IngestObserver>>,
    robust_tx: watch::Sender<Arc<RobustWindow>>,
    scheduler: RobustRecalculationScheduler,
}

impl StreamIngestManager {
    pub fn new(config: Config) -> Self {
        let ecg_rate = config.ecg.sampling_rate_hz;
        let accel_rate = config.accel.sampling_rate_hz;
        let bounds = config.hrv.rr_bounds();
        let peak_detector = PeakDetector::new(config.peaks.clone(), bounds);

        // At most one beat per shortest plausible RR over the robust window
        let beats_per_second = 1.0 / bounds.min_s.max(FASTEST_RR_S);
        let rr_capacity = window_capacity(beats_per_second, config.ecg.robust_window_s).saturating_add(1);

        let robust_window = RollingBuffer::with_window(ecg_rate, config.ecg.robust_window_s);
        let (robust_tx, robust_rx) = watch::channel(Arc::new(RobustWindow {
            session_id: 0,
            ecg: Vec::new(),
            capacity: robust_window.capacity(),
            sampling_rate_hz: ecg_rate,
            hardware_rr: Vec::new(),
        }));
        let calculator = RobustCalculator::new(config.robust.clone(), &config.hrv, peak_detector.clone());

        StreamIngestManager {
            peak_detector,
            jump_detector: JumpDetector::new(config.jump.clone()),
            session_id: 0,
            session_start: None,
            ecg_clock: StreamClock::new(ecg_rate),
            display: RollingBuffer::with_window(ecg_rate, config.ecg.display_window_s),
            hrv_window: RollingBuffer::with_window(ecg_rate, config.ecg.hrv_window_s),
            robust_window,
            ecg_pending: 0,
            hardware_rr: RollingBuffer::new(rr_capacity),
            accel_clock: StreamClock::new(accel_rate),
            accel_window: RollingBuffer::with_window(accel_rate, config.accel.jump_window_s),
            accel_pending: 0,
            jump_events: Vec::new(),
            detected_beats: Vec::new(),
            live: None,
            history: RollingBuffer::new(config.session.history_limit),
            observers: Vec::new(),
            robust_tx,
            scheduler: RobustRecalculationScheduler::new(calculator, robust_rx),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn subscribe(&mut self, observer: Box<dyn IngestObserver>) {
        self.observers.push(observer);
    }

    /// Append a raw batch that arrived just now.
    pub fn append_samples(&mut self, raw: &[f64], channel: Channel) -> IngestReport {
        self.append_samples_at(raw, channel, Instant::now())
    }

    /// Append a raw batch whose last sample arrived at `arrival`.
    ///
    /// `Channel::Acceleration` batches are treated as an already-vertical series
    /// in g.
    pub fn append_samples_at(&mut self, raw: &[f64], channel: Channel, arrival: Instant) -> IngestReport {
        match channel {
            Channel::Ecg => self.append_ecg(raw, arrival),
            Channel::Acceleration => self.append_vertical(raw, arrival),
        }
    }

    /// Append tri-axial readings that arrived just now.
    pub fn append_acceleration(&mut self, batch: &[Acceleration]) -> IngestReport {
        self.append_acceleration_at(batch, Instant::now())
    }

    pub fn append_acceleration_at(&mut self, batch: &[Acceleration], arrival: Instant) -> IngestReport {
        let vertical = vertical_series(batch, self.config.accel.vertical_axis);
        self.append_vertical(&vertical, arrival)
    }

    /// Append sensor-reported RR intervals in milliseconds, received just now.
    pub fn append_rr_intervals(&mut self, rr_ms: &[f64]) -> usize {
        self.append_rr_intervals_at(rr_ms, Instant::now())
    }

    /// Append sensor-reported RR intervals; the last beat is taken to have
    /// happened at `arrival`. Returns the number of intervals kept.
    ///
    /// Implausible intervals and intervals inside the stabilization period are
    /// dropped.
    pub fn append_rr_intervals_at(&mut self, rr_ms: &[f64], arrival: Instant) -> usize {
        if rr_ms.is_empty() {
            return 0;
        }
        let start = *self.session_start.get_or_insert(arrival);
        let bounds = self.config.hrv.rr_bounds();

        // Walk backwards from the arrival to recover each beat's time
        let mut beat_time = arrival;
        let mut stamped = Vec::with_capacity(rr_ms.len());
        for &ms in rr_ms.iter().rev() {
            let rr_s = ms / 1000.0;
            stamped.push(Sample::new(rr_s, beat_time));
            beat_time = beat_time.checked_sub(seconds(rr_s)).unwrap_or(beat_time);
        }
        stamped.reverse();

        let accepted: Vec<Sample> = stamped
            .into_iter()
            .filter(|rr| bounds.contains(rr.value) && self.is_stabilized(start, rr.source_time))
            .collect();
        let kept = accepted.len();
        self.hardware_rr.extend(accepted);
        if kept < rr_ms.len() {
            debug!("Dropped {} of {} hardware RR intervals", rr_ms.len() - kept, rr_ms.len());
        }
        kept
    }

    fn is_stabilized(&self, start: Instant, at: Instant) -> bool {
        start
            .checked_add(seconds(self.config.session.stabilization_s))
            .map_or(false, |end| at >= end)
    }

    fn append_ecg(&mut self, raw: &[f64], arrival: Instant) -> IngestReport {
        let mut report = IngestReport::empty(Channel::Ecg);
        if raw.is_empty() {
            return report;
        }

        let (clean, replaced) = sanitize(raw);
        if replaced > 0 {
            report.quality.push(DataQuality::NonFinite { count: replaced });
        }
        let values = preprocess(&clean, &self.config.ecg.preprocess);

        let gap_tolerance = seconds(self.config.session.gap_tolerance_s);
        let (times, issue) = self.ecg_clock.stamp(values.len(), arrival, gap_tolerance);
        report.quality.extend(issue);

        let start = match times.first() {
            Some(first) => *self.session_start.get_or_insert(*first),
            None => return report,
        };

        for (value, time) in values.into_iter().zip(times) {
            let sample = Sample::new(value, time);
            self.display.push(sample);
            if self.is_stabilized(start, time) {
                self.hrv_window.push(sample);
                self.robust_window.push(sample);
            }
        }
        report.accepted = raw.len();
        trace!(
            "ECG batch of {} (display {}, hrv {}, robust {})",
            raw.len(),
            self.display.len(),
            self.hrv_window.len(),
            self.robust_window.len()
        );

        self.notify_quality(Channel::Ecg, &report.quality);

        self.ecg_pending += raw.len();
        let interval = seconds_to_samples(
            self.config.session.live_interval_s,
            self.config.ecg.sampling_rate_hz,
            1,
        );
        if self.ecg_pending >= interval {
            self.ecg_pending = 0;
            self.recompute_live();
            self.publish_robust_window();
            report.recomputed = true;
        }
        report
    }

    fn append_vertical(&mut self, raw: &[f64], arrival: Instant) -> IngestReport {
        let mut report = IngestReport::empty(Channel::Acceleration);
        if raw.is_empty() {
            return report;
        }

        let (clean, replaced) = sanitize(raw);
        if replaced > 0 {
            report.quality.push(DataQuality::NonFinite { count: replaced });
        }
        let values = preprocess(&clean, &self.config.accel.preprocess);

        let gap_tolerance = seconds(self.config.session.gap_tolerance_s);
        let (times, issue) = self.accel_clock.stamp(values.len(), arrival, gap_tolerance);
        report.quality.extend(issue);
        if let Some(first) = times.first() {
            self.session_start.get_or_insert(*first);
        }

        self.accel_window.extend(values);
        report.accepted = raw.len();
        self.notify_quality(Channel::Acceleration, &report.quality);

        self.accel_pending += raw.len();
        let interval = seconds_to_samples(
            self.config.session.live_interval_s,
            self.config.accel.sampling_rate_hz,
            1,
        );
        if self.accel_pending >= interval {
            self.accel_pending = 0;
            report.new_jumps = self.detect_jumps();
            report.recomputed = true;
        }
        report
    }

    fn notify_quality(&mut self, channel: Channel, issues: &[DataQuality]) {
        for issue in issues {
            warn!("{:?} data quality issue: {:?}", channel, issue);
            for observer in &mut self.observers {
                observer.on_data_quality(channel, issue);
            }
        }
    }

    /// Sensor RR intervals whose beat falls within the trailing `window_s`.
    fn hardware_rr_within(&self, window_s: f64) -> Vec<f64> {
        let newest = match (self.display.latest(), self.hardware_rr.latest()) {
            (Some(ecg), Some(rr)) => ecg.source_time.max(rr.source_time),
            (None, Some(rr)) => rr.source_time,
            (_, None) => return Vec::new(),
        };
        let cutoff = newest.checked_sub(seconds(window_s));
        self.hardware_rr
            .iter()
            .filter(|rr| cutoff.map_or(true, |cutoff| rr.source_time >= cutoff))
            .map(|rr| rr.value)
            .collect()
    }

    fn recompute_live(&mut self) {
        let rate = self.config.ecg.sampling_rate_hz;

        let display: Vec<f64> = self.display.iter().map(|s| s.value).collect();
        self.detected_beats = self.peak_detector.detect(&display, rate);

        let hrv_values: Vec<f64> = self.hrv_window.iter().map(|s| s.value).collect();
        let hardware = self.hardware_rr_within(self.config.ecg.hrv_window_s);
        let detector = &self.peak_detector;
        let (rr, source) = self
            .config
            .hrv
            .live_source
            .select(hardware, || detector.detect_rr(&hrv_values, rate));

        let window_seconds = hrv_values.len() as f64 / rate;
        self.live = HrvSnapshot::try_from_rr(&rr, window_seconds, source, self.config.hrv.nn50_threshold_s);

        if let Some(snapshot) = &self.live {
            debug!(
                "Live HR {:.1} BPM, RMSSD {:.1} ms over {} {:?} intervals",
                snapshot.mean_hr_bpm,
                snapshot.rmssd_ms,
                rr.len(),
                source
            );
            self.history.push(snapshot.clone());
            for observer in &mut self.observers {
                observer.on_live_metric(snapshot);
            }
        }
    }

    fn publish_robust_window(&mut self) {
        let window = RobustWindow {
            session_id: self.session_id,
            ecg: self.robust_window.iter().map(|s| s.value).collect(),
            capacity: self.robust_window.capacity(),
            sampling_rate_hz: self.config.ecg.sampling_rate_hz,
            hardware_rr: self.hardware_rr_within(self.config.ecg.robust_window_s),
        };
        self.robust_tx.send_replace(Arc::new(window));
    }

    fn detect_jumps(&mut self) -> usize {
        let window = self.accel_window.snapshot();
        let offset = self.accel_window.total_pushed() as usize - window.len();
        let last_landing = self.jump_events.last().map(|e| e.landing_index);

        let fresh: Vec<JumpEvent> = self
            .jump_detector
            .detect(&window, self.config.accel.sampling_rate_hz)
            .into_iter()
            .map(|event| JumpEvent {
                takeoff_index: event.takeoff_index + offset,
                landing_index: event.landing_index + offset,
                ..event
            })
            .filter(|event| last_landing.map_or(true, |landing| event.takeoff_index > landing))
            .collect();

        if fresh.is_empty() {
            return 0;
        }
        for event in &fresh {
            info!(
                "Jump detected: {:.1} cm ({:.3} s flight, {:?})",
                event.height_cm, event.flight_seconds, event.method
            );
        }
        for observer in &mut self.observers {
            observer.on_jump_events(&fresh);
        }
        self.jump_events.extend_from_slice(&fresh);
        fresh.len()
    }

    /// Preprocessed display window values, oldest first.
    pub fn display_window(&self) -> Vec<f64> {
        self.display.iter().map(|s| s.value).collect()
    }

    pub fn display_samples(&self) -> Vec<Sample> {
        self.display.snapshot()
    }

    /// R-peak indices into [`display_window`](Self::display_window) as of the
    /// last live recomputation.
    pub fn detected_beats(&self) -> &[usize] {
        &self.detected_beats
    }

    /// Latest live metric, `None` while fewer than two RR intervals are available.
    pub fn live_metric(&self) -> Option<&HrvSnapshot> {
        self.live.as_ref()
    }

    pub fn hrv_history(&self) -> Vec<HrvSnapshot> {
        self.history.snapshot()
    }

    /// The robust snapshot when one exists, otherwise the live metric.
    pub fn latest_snapshot(&self) -> Option<HrvSnapshot> {
        self.scheduler.state().last_snapshot.or_else(|| self.live.clone())
    }

    /// Jumps recorded this session; indices are absolute accelerometer sample positions.
    pub fn jump_events(&self) -> &[JumpEvent] {
        &self.jump_events
    }

    pub fn robust_state(&self) -> RobustCalculationState {
        self.scheduler.state()
    }

    pub fn subscribe_robust_state(&self) -> watch::Receiver<RobustCalculationState> {
        self.scheduler.subscribe()
    }

    /// Fill fraction of the robust buffer as of the latest append.
    pub fn robust_fill_ratio(&self) -> f64 {
        self.robust_window.fill_ratio()
    }

    pub fn start_robust_calculation(&mut self) -> Result<(), SchedulerError> {
        self.publish_robust_window();
        self.scheduler.start()
    }

    pub fn stop_robust_calculation(&mut self) {
        self.scheduler.stop();
    }

    pub fn is_robust_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Discard every buffer and start a new session. A running robust
    /// calculation restarts from idle.
    pub fn reset_session(&mut self) {
        let was_running = self.scheduler.is_running();
        self.scheduler.stop();

        self.session_id += 1;
        self.session_start = None;
        self.ecg_clock.reset();
        self.accel_clock.reset();
        self.display.clear();
        self.hrv_window.clear();
        self.robust_window.clear();
        self.hardware_rr.clear();
        self.accel_window.clear();
        self.ecg_pending = 0;
        self.accel_pending = 0;
        self.jump_events.clear();
        self.detected_beats.clear();
        self.live = None;
        self.history.clear();
        self.publish_robust_window();
        info!("Session reset, now session {}", self.session_id);

        if was_running {
            if let Err(e) = self.scheduler.start() {
                warn!("Robust calculation not restarted: {}", e);
            }
        }
    }

    /// Snapshot of the session for persistence or display.
    pub fn session_export(&self) -> SessionExport {
        let display_window = match self.session_start {
            Some(start) => self
                .display
                .iter()
                .map(|s| ExportedSample {
                    t_seconds: s.source_time.saturating_duration_since(start).as_secs_f64(),
                    value: s.value,
                })
                .collect(),
            None => Vec::new(),
        };
        SessionExport {
            session_id: self.session_id,
            display_window,
            detected_beats: self.detected_beats.clone(),
            hrv_history: self.history.snapshot(),
            latest_snapshot: self.latest_snapshot(),
            robust: self.scheduler.state(),
            jump_events: self.jump_events.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.session.stabilization_s = 2.0;
        config
    }

    #[test]
    fn test_preprocess_pipeline() {
        let settings = PreprocessConfig {
            demean: true,
            clamp_limit: Some(1.0),
            smoothing_window: 1,
        };
        assert_eq!(preprocess(&[0.0, 4.0, 2.0], &settings), vec![-1.0, 1.0, 0.0]);

        let passthrough = PreprocessConfig {
            demean: false,
            clamp_limit: None,
            smoothing_window: 1,
        };
        assert_eq!(preprocess(&[5.0, -7.0], &passthrough), vec![5.0, -7.0]);
    }

    #[test]
    fn test_sanitize_replaces_non_finite() {
        let (values, replaced) = sanitize(&[1.0, f64::NAN, 3.0, f64::INFINITY]);
        assert_eq!(replaced, 2);
        assert_eq!(values, vec![1.0, 2.0, 3.0, 2.0]);

        let (values, replaced) = sanitize(&[f64::NAN]);
        assert_eq!(replaced, 1);
        assert_eq!(values, vec![0.0]);
    }

    #[test]
    fn test_clock_continues_nominal_timeline() {
        let mut clock = StreamClock::new(100.0);
        let t0 = Instant::now();
        let tolerance = Duration::from_secs(1);

        let (first, issue) = clock.stamp(10, t0 + Duration::from_millis(90), tolerance);
        assert!(issue.is_none());
        assert_eq!(first[0], t0);
        assert_eq!(first[9], t0 + Duration::from_millis(90));

        // Slight arrival jitter does not move the timeline
        let (second, issue) = clock.stamp(10, t0 + Duration::from_millis(230), tolerance);
        assert!(issue.is_none());
        assert_eq!(second[0], t0 + Duration::from_millis(100));
    }

    #[test]
    fn test_clock_flags_gap_and_reanchors() {
        let mut clock = StreamClock::new(100.0);
        let t0 = Instant::now();
        let tolerance = Duration::from_secs(1);
        clock.stamp(10, t0 + Duration::from_millis(90), tolerance);

        let (times, issue) = clock.stamp(10, t0 + Duration::from_secs(5), tolerance);
        assert!(matches!(issue, Some(DataQuality::Gap { seconds }) if seconds > 4.0));
        assert_eq!(times[9], t0 + Duration::from_secs(5));
    }

    #[test]
    fn test_clock_flags_out_of_order_arrival() {
        let mut clock = StreamClock::new(100.0);
        let t0 = Instant::now();
        let tolerance = Duration::from_secs(1);
        clock.stamp(10, t0 + Duration::from_millis(500), tolerance);

        let (times, issue) = clock.stamp(10, t0 + Duration::from_millis(200), tolerance);
        assert_eq!(issue, Some(DataQuality::NonMonotonic));
        // Times still advance past the previous batch
        assert_eq!(times[0], t0 + Duration::from_millis(510));
    }

    #[test]
    fn test_clock_survives_unrepresentable_times() {
        let t0 = Instant::now();

        // A tolerance past the end of the clock never reports a gap
        let mut clock = StreamClock::new(100.0);
        clock.stamp(10, t0, Duration::MAX);
        let (times, issue) = clock.stamp(10, t0 + Duration::from_millis(100), Duration::MAX);
        assert!(issue.is_none());
        assert_eq!(times[0], t0 + Duration::from_millis(10));

        // Sample offsets that overflow hold the last representable time
        let mut clock = StreamClock::new(1e-19);
        let (times, _) = clock.stamp(4, t0, Duration::ZERO);
        assert_eq!(times.len(), 4);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        let (times, _) = clock.stamp(4, t0 + Duration::from_secs(1), Duration::ZERO);
        assert_eq!(times.len(), 4);
    }

    #[test]
    fn test_unvalidated_config_does_not_panic() {
        let t0 = Instant::now();

        let mut lenient = config();
        lenient.session.gap_tolerance_s = 1e19;
        let mut manager = StreamIngestManager::new(lenient);
        manager.append_samples_at(&[0.1; 13], Channel::Ecg, t0);
        let report = manager.append_samples_at(&[0.1; 13], Channel::Ecg, t0 + Duration::from_millis(100));
        assert_eq!(report.accepted, 13);
        assert!(report.quality.is_empty());

        let mut zero_rr = config();
        zero_rr.hrv.rr_min_s = 0.0;
        let manager = StreamIngestManager::new(zero_rr);
        // 120 s at 300 BPM, plus one
        assert_eq!(manager.hardware_rr.capacity(), 601);

        let mut unbounded = config();
        unbounded.session.history_limit = usize::MAX;
        let manager = StreamIngestManager::new(unbounded);
        assert!(manager.hrv_history().is_empty());
    }

    #[test]
    fn test_stabilization_keeps_hrv_buffers_empty() {
        let mut manager = StreamIngestManager::new(config());
        let t0 = Instant::now();

        // One second of ECG, well inside the 2 s stabilization period
        let report = manager.append_samples_at(&[0.1; 130], Channel::Ecg, t0);
        assert_eq!(report.accepted, 130);
        assert!(report.recomputed);
        assert_eq!(manager.display_window().len(), 130);
        assert_eq!(manager.hrv_window.len(), 0);
        assert_eq!(manager.robust_window.len(), 0);
        assert!(manager.live_metric().is_none());
    }

    #[test]
    fn test_hardware_rr_respects_stabilization_and_bounds() {
        let mut manager = StreamIngestManager::new(config());
        let t0 = Instant::now();

        // Session starts with the first RR batch; these fall inside stabilization
        assert_eq!(manager.append_rr_intervals_at(&[800.0], t0), 0);
        // Beats at 6.59, 6.69, 9.19 and 10 s; the 100 ms and 2.5 s intervals are implausible
        let batch = [800.0, 100.0, 2500.0, 810.0];
        assert_eq!(manager.append_rr_intervals_at(&batch, t0 + Duration::from_secs(10)), 2);
        assert_eq!(manager.hardware_rr.len(), 2);
        assert_eq!(manager.append_rr_intervals_at(&[], t0), 0);
    }

    #[test]
    fn test_non_finite_batch_is_flagged() {
        struct Recorder(Arc<std::sync::Mutex<Vec<DataQuality>>>);
        impl IngestObserver for Recorder {
            fn on_data_quality(&mut self, _channel: Channel, issue: &DataQuality) {
                self.0.lock().unwrap().push(issue.clone());
            }
        }

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut manager = StreamIngestManager::new(config());
        manager.subscribe(Box::new(Recorder(Arc::clone(&seen))));

        let report = manager.append_samples_at(&[0.1, f64::NAN, 0.3], Channel::Ecg, Instant::now());
        assert_eq!(report.quality, vec![DataQuality::NonFinite { count: 1 }]);
        assert!(manager.display_window().iter().all(|v| v.is_finite()));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_batches_are_ignored() {
        let mut manager = StreamIngestManager::new(config());
        let report = manager.append_samples(&[], Channel::Ecg);
        assert_eq!(report.accepted, 0);
        assert!(!report.recomputed);
        assert_eq!(manager.append_acceleration(&[]).accepted, 0);
        assert!(manager.session_export().display_window.is_empty());
    }

    #[test]
    fn test_reset_session_clears_everything() {
        let mut manager = StreamIngestManager::new(config());
        let t0 = Instant::now();
        for second in 0..5u64 {
            manager.append_samples_at(&[0.2; 130], Channel::Ecg, t0 + Duration::from_secs(second));
        }
        assert!(!manager.display_window().is_empty());

        manager.reset_session();
        assert_eq!(manager.session_id(), 1);
        assert!(manager.display_window().is_empty());
        assert!(manager.hrv_history().is_empty());
        assert!(manager.live_metric().is_none());
        assert_eq!(manager.robust_fill_ratio(), 0.0);
        assert!(!manager.robust_state().is_ready());
    }

    #[test]
    fn test_start_robust_outside_runtime() {
        let mut manager = StreamIngestManager::new(config());
        assert_eq!(manager.start_robust_calculation(), Err(SchedulerError::NoRuntime));
        manager.stop_robust_calculation();
        assert!(!manager.is_robust_running());
    }
}
