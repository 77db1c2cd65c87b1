//! # Robust HRV Recalculation
//!
//! The live metric is recomputed every second over a short window. The robust
//! metric covers a much longer window (two minutes by default) and is only
//! meaningful once that window is completely full, so it runs as a small state
//! machine on its own tokio task:
//!
//! - **Idle**: poll the robust buffer every `poll_interval`, publishing fill
//!   progress. Progress never decreases while idle.
//! - **Ready**: entered the first time the buffer is full. Progress is pinned at
//!   1.0 and a fresh snapshot is computed every `recompute_interval`.
//!
//! The ingest manager owns the buffers and publishes an immutable
//! [`RobustWindow`] copy through a watch channel; this module only ever reads
//! those copies. State flows back out through a second watch channel, and every
//! write to it is tagged with the start epoch so a task that outlives `stop()`
//! can never overwrite the reset state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{HrvConfig, RobustConfig};
use crate::peak_detector::PeakDetector;
use crate::HrvSnapshot;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no tokio runtime available to run the robust scheduler")]
    NoRuntime,
}

/// Phase of the robust calculation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobustPhase {
    /// Waiting for the robust buffer to fill
    #[default]
    Idle,
    /// Buffer filled at least once; snapshots are recomputed periodically
    Ready,
}

/// Observable state of the robust calculation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RobustCalculationState {
    pub phase: RobustPhase,
    /// Buffer fill fraction in `[0, 1]`; exactly 1.0 once ready
    pub progress: f64,
    /// `None` while idle, or when the chosen RR source had fewer than 2 intervals
    pub last_snapshot: Option<HrvSnapshot>,
    /// Recording session the state belongs to
    pub session_id: u64,
}

impl RobustCalculationState {
    pub fn is_ready(&self) -> bool {
        self.phase == RobustPhase::Ready
    }
}

/// Immutable copy of the robust buffer handed to the calculator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RobustWindow {
    pub session_id: u64,
    /// Preprocessed ECG, oldest first
    pub ecg: Vec<f64>,
    /// Capacity of the robust buffer the copy was taken from
    pub capacity: usize,
    pub sampling_rate_hz: f64,
    /// Sensor-reported RR intervals inside the window, seconds
    pub hardware_rr: Vec<f64>,
}

impl RobustWindow {
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.ecg.len() as f64 / self.capacity as f64).clamp(0.0, 1.0)
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.ecg.len() >= self.capacity
    }

    pub fn window_seconds(&self) -> f64 {
        if self.sampling_rate_hz > 0.0 {
            self.capacity as f64 / self.sampling_rate_hz
        } else {
            0.0
        }
    }
}

/// One step of the robust state machine, free of any scheduling concerns.
#[derive(Debug, Clone)]
pub struct RobustCalculator {
    config: RobustConfig,
    detector: PeakDetector,
    nn_threshold_s: f64,
}

impl RobustCalculator {
    pub fn new(config: RobustConfig, hrv: &HrvConfig, detector: PeakDetector) -> Self {
        RobustCalculator {
            config,
            detector,
            nn_threshold_s: hrv.nn50_threshold_s,
        }
    }

    /// Advance `state` against `window` and return how long to wait before the
    /// next step.
    pub fn step(&self, window: &RobustWindow, state: &mut RobustCalculationState) -> Duration {
        if window.session_id != state.session_id {
            debug!("Robust state reset for session {}", window.session_id);
            *state = RobustCalculationState {
                session_id: window.session_id,
                ..RobustCalculationState::default()
            };
        }

        match state.phase {
            RobustPhase::Idle if window.is_full() => {
                state.phase = RobustPhase::Ready;
                state.progress = 1.0;
                state.last_snapshot = self.compute(window);
                info!(
                    "Robust window full ({:.0} s), first snapshot {}",
                    window.window_seconds(),
                    if state.last_snapshot.is_some() { "computed" } else { "unavailable" }
                );
                self.config.recompute_interval()
            }
            RobustPhase::Idle => {
                state.progress = state.progress.max(window.fill_ratio());
                self.config.poll_interval()
            }
            RobustPhase::Ready => {
                state.last_snapshot = self.compute(window);
                self.config.recompute_interval()
            }
        }
    }

    /// Snapshot over the whole window using the configured RR source.
    pub fn compute(&self, window: &RobustWindow) -> Option<HrvSnapshot> {
        let (rr, source) = self
            .config
            .source
            .select(window.hardware_rr.clone(), || {
                self.detector.detect_rr(&window.ecg, window.sampling_rate_hz)
            });
        let snapshot = HrvSnapshot::try_from_rr(&rr, window.window_seconds(), source, self.nn_threshold_s);
        if snapshot.is_none() {
            warn!("Robust snapshot unavailable: only {} {:?} RR interval(s)", rr.len(), source);
        }
        snapshot
    }
}

struct RunningTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs [`RobustCalculator`] periodically on a tokio task.
pub struct RobustRecalculationScheduler {
    calculator: Arc<RobustCalculator>,
    windows: watch::Receiver<Arc<RobustWindow>>,
    state_tx: Arc<watch::Sender<RobustCalculationState>>,
    epoch: Arc<AtomicU64>,
    task: Option<RunningTask>,
    runtime: Option<Handle>,
}

impl RobustRecalculationScheduler {
    pub fn new(calculator: RobustCalculator, windows: watch::Receiver<Arc<RobustWindow>>) -> Self {
        let (state_tx, _) = watch::channel(RobustCalculationState::default());
        RobustRecalculationScheduler {
            calculator: Arc::new(calculator),
            windows,
            state_tx: Arc::new(state_tx),
            epoch: Arc::new(AtomicU64::new(0)),
            task: None,
            runtime: None,
        }
    }

    /// Start the loop on the current tokio runtime, or the one used by the
    /// previous start. Starting a running scheduler is a no-op.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        let handle = Handle::try_current()
            .ok()
            .or_else(|| self.runtime.clone())
            .ok_or(SchedulerError::NoRuntime)?;
        self.start_on(&handle);
        Ok(())
    }

    pub fn start_on(&mut self, runtime: &Handle) {
        if self.is_running() {
            return;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.state_tx.send_replace(RobustCalculationState::default());

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let calculator = Arc::clone(&self.calculator);
        let windows = self.windows.clone();
        let state_tx = Arc::clone(&self.state_tx);
        let current_epoch = Arc::clone(&self.epoch);

        let handle = runtime.spawn(async move {
            debug!("Robust scheduler task {} started", epoch);
            let mut state = RobustCalculationState::default();
            loop {
                let window = Arc::clone(&*windows.borrow());
                let delay = calculator.step(&window, &mut state);

                let mut stale = false;
                state_tx.send_if_modified(|published| {
                    if current_epoch.load(Ordering::SeqCst) != epoch {
                        stale = true;
                        return false;
                    }
                    if *published == state {
                        return false;
                    }
                    *published = state.clone();
                    true
                });
                if stale {
                    break;
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Robust scheduler task {} stopped", epoch);
        });

        self.task = Some(RunningTask {
            shutdown: shutdown_tx,
            handle,
        });
        self.runtime = Some(runtime.clone());
        info!("Robust recalculation started");
    }

    /// Stop the loop and reset the published state to idle. Idempotent.
    pub fn stop(&mut self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            let _ = task.shutdown.send(true);
            info!("Robust recalculation stopped");
        }
        self.state_tx.send_replace(RobustCalculationState::default());
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.handle.is_finished())
    }

    pub fn state(&self) -> RobustCalculationState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RobustCalculationState> {
        self.state_tx.subscribe()
    }
}

impl Drop for RobustRecalculationScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.shutdown.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn calculator() -> RobustCalculator {
        let config = Config::default();
        RobustCalculator::new(config.robust.clone(), &config.hrv, PeakDetector::default())
    }

    fn window(len: usize, capacity: usize, hardware_rr: Vec<f64>) -> RobustWindow {
        RobustWindow {
            session_id: 0,
            ecg: vec![0.0; len],
            capacity,
            sampling_rate_hz: 130.0,
            hardware_rr,
        }
    }

    #[test]
    fn test_progress_is_monotonic_while_idle() {
        let calc = calculator();
        let mut state = RobustCalculationState::default();

        let delay = calc.step(&window(25, 100, vec![]), &mut state);
        assert_eq!(delay, Duration::from_secs(1));
        assert_eq!(state.progress, 0.25);

        calc.step(&window(60, 100, vec![]), &mut state);
        assert_eq!(state.progress, 0.6);

        // A shorter copy (e.g. published before a late batch) never moves progress back
        calc.step(&window(40, 100, vec![]), &mut state);
        assert_eq!(state.progress, 0.6);
        assert_eq!(state.phase, RobustPhase::Idle);
        assert!(state.last_snapshot.is_none());
    }

    #[test]
    fn test_full_window_becomes_ready() {
        let calc = calculator();
        let mut state = RobustCalculationState::default();
        let rr = vec![0.8, 0.85, 0.8, 0.9];

        let delay = calc.step(&window(100, 100, rr), &mut state);
        assert_eq!(delay, Duration::from_secs(10));
        assert!(state.is_ready());
        assert_eq!(state.progress, 1.0);

        let snapshot = state.last_snapshot.clone().unwrap();
        assert_eq!(snapshot.source, crate::RrSource::Hardware);
        assert_eq!(snapshot.nn50, 1);

        // Ready stays ready and keeps recomputing
        let delay = calc.step(&window(100, 100, vec![1.0, 1.0, 1.0]), &mut state);
        assert_eq!(delay, Duration::from_secs(10));
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.last_snapshot.unwrap().mean_hr_bpm, 60.0);
    }

    #[test]
    fn test_ready_without_enough_intervals_has_no_snapshot() {
        let calc = calculator();
        let mut state = RobustCalculationState::default();

        // Flat ECG and no hardware RR: nothing to compute from
        calc.step(&window(100, 100, vec![]), &mut state);
        assert!(state.is_ready());
        assert!(state.last_snapshot.is_none());
    }

    #[test]
    fn test_new_session_resets_state() {
        let calc = calculator();
        let mut state = RobustCalculationState::default();
        calc.step(&window(100, 100, vec![0.8, 0.8]), &mut state);
        assert!(state.is_ready());

        let mut next = window(10, 100, vec![]);
        next.session_id = 1;
        calc.step(&next, &mut state);
        assert_eq!(state.phase, RobustPhase::Idle);
        assert_eq!(state.session_id, 1);
        assert_eq!(state.progress, 0.1);
    }

    #[test]
    fn test_window_helpers() {
        let empty = RobustWindow::default();
        assert_eq!(empty.fill_ratio(), 0.0);
        assert!(!empty.is_full());
        assert_eq!(empty.window_seconds(), 0.0);
        assert_eq!(window(0, 260, vec![]).window_seconds(), 2.0);
    }

    #[test]
    fn test_start_requires_runtime() {
        let (_tx, rx) = watch::channel(Arc::new(RobustWindow::default()));
        let mut scheduler = RobustRecalculationScheduler::new(calculator(), rx);
        assert_eq!(scheduler.start(), Err(SchedulerError::NoRuntime));
        assert!(!scheduler.is_running());
        scheduler.stop();
        assert_eq!(scheduler.state(), RobustCalculationState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_publishes_progress_and_resets_on_stop() {
        let (tx, rx) = watch::channel(Arc::new(window(50, 100, vec![])));
        let mut scheduler = RobustRecalculationScheduler::new(calculator(), rx);
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.state().progress, 0.5);

        tx.send_replace(Arc::new(window(100, 100, vec![0.8, 0.9, 0.8])));
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let state = scheduler.state();
        assert!(state.is_ready());
        assert_eq!(state.progress, 1.0);
        assert!(state.last_snapshot.is_some());

        scheduler.stop();
        assert_eq!(scheduler.state(), RobustCalculationState::default());

        // The stopped task must not overwrite the reset state
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(scheduler.state().progress, 0.0);

        tx.send_replace(Arc::new(window(30, 100, vec![])));
        scheduler.start().unwrap();
        assert_eq!(scheduler.state().progress, 0.0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.state().progress, 0.3);
        scheduler.stop();
    }
}
