//! # HRV Tracker Application Entry Point
//!
//! Replays a synthetic sensor session through the streaming pipeline, the same
//! way a connected chest strap would feed it: ECG and accelerometer batches at
//! their nominal cadence, optionally with sensor-reported RR intervals. The
//! robust scheduler runs alongside, and the final state is printed as an ASCII
//! chart with a metrics footer (and optionally as JSON lines).

use std::env;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use log::{info, warn};

use hrv_tracker_lib::config::{Config, CONFIG_FILE};
use hrv_tracker_lib::ingest::{IngestObserver, StreamIngestManager};
use hrv_tracker_lib::synthetic::{self, EcgProfile, ScriptedJump};
use hrv_tracker_lib::{report, Channel, HrvSnapshot, JumpEvent};

/// Batches per second of signal, roughly what a BLE sensor delivers
const BATCHES_PER_SECOND: usize = 4;

#[derive(Debug, Clone, PartialEq)]
struct Options {
    config_path: Option<String>,
    seconds: f64,
    /// Replay speed multiplier; 0 replays as fast as possible
    speed: f64,
    hardware_rr: bool,
    json: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            config_path: None,
            seconds: 150.0,
            speed: 20.0,
            hardware_rr: false,
            json: false,
        }
    }
}

impl Options {
    fn parse<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut options = Options::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => options.config_path = Some(args.next().ok_or_else(|| anyhow!("--config needs a path"))?),
                "--seconds" => options.seconds = parse_number(&mut args, "--seconds")?,
                "--speed" => options.speed = parse_number(&mut args, "--speed")?,
                "--hardware-rr" => options.hardware_rr = true,
                "--json" => options.json = true,
                other => bail!("unknown argument: {other}"),
            }
        }
        if !(options.seconds > 0.0) {
            bail!("--seconds must be positive");
        }
        if options.speed < 0.0 {
            bail!("--speed must not be negative");
        }
        Ok(options)
    }
}

fn parse_number(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<f64> {
    let value = args.next().ok_or_else(|| anyhow!("{flag} needs a value"))?;
    value
        .parse::<f64>()
        .with_context(|| format!("{flag}: not a number: {value}"))
}

/// Prints live metrics and jumps as JSON lines while the session runs.
struct JsonLines;

impl IngestObserver for JsonLines {
    fn on_live_metric(&mut self, snapshot: &HrvSnapshot) {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Could not encode live metric: {}", e),
        }
    }

    fn on_jump_events(&mut self, events: &[JumpEvent]) {
        for event in events {
            if let Ok(line) = serde_json::to_string(event) {
                println!("{line}");
            }
        }
    }
}

async fn replay(options: &Options, config: Config) -> anyhow::Result<()> {
    let ecg_rate = config.ecg.sampling_rate_hz;
    let accel_rate = config.accel.sampling_rate_hz;

    let profile = EcgProfile {
        sampling_rate_hz: ecg_rate,
        ..EcgProfile::default()
    };
    let ecg = synthetic::ecg(&profile, options.seconds);
    let jumps: Vec<ScriptedJump> = (1..)
        .map(|i| ScriptedJump {
            takeoff_s: 20.0 * i as f64,
            flight_s: 0.3 + 0.05 * (i % 4) as f64,
        })
        .take_while(|jump| jump.takeoff_s + 2.0 < options.seconds)
        .collect();
    let accel = synthetic::jump_trace(accel_rate, options.seconds, &jumps);
    info!(
        "Replaying {:.0} s: {} ECG samples, {} beats, {} scripted jumps",
        options.seconds,
        ecg.samples.len(),
        ecg.beat_times.len(),
        jumps.len()
    );

    let mut manager = StreamIngestManager::new(config);
    if options.json {
        manager.subscribe(Box::new(JsonLines));
    }
    manager.start_robust_calculation()?;

    let ecg_batch = ((ecg_rate as usize) / BATCHES_PER_SECOND).max(1);
    let batch_duration = Duration::from_secs_f64(1.0 / BATCHES_PER_SECOND as f64);
    let origin = Instant::now();
    let mut next_beat = 0;
    let mut accel_sent = 0;

    for (index, chunk) in ecg.samples.chunks(ecg_batch).enumerate() {
        let end_s = ((index * ecg_batch + chunk.len()) as f64) / ecg_rate;
        let arrival = origin + Duration::from_secs_f64(end_s);
        manager.append_samples_at(chunk, Channel::Ecg, arrival);

        if options.hardware_rr {
            // Report every beat that completed within this batch
            let mut rr_ms = Vec::new();
            while next_beat < ecg.rr_intervals.len() && ecg.beat_times[next_beat + 1] <= end_s {
                rr_ms.push(ecg.rr_intervals[next_beat] * 1000.0);
                next_beat += 1;
            }
            if !rr_ms.is_empty() {
                manager.append_rr_intervals_at(&rr_ms, arrival);
            }
        }

        // Accelerometer readings covering the same stretch of time
        let accel_end = ((end_s * accel_rate) as usize).min(accel.len());
        if accel_end > accel_sent {
            manager.append_acceleration_at(&accel[accel_sent..accel_end], arrival);
            accel_sent = accel_end;
        }

        if options.speed > 0.0 {
            tokio::time::sleep(batch_duration.div_f64(options.speed)).await;
        }
    }

    // Give the scheduler a chance to observe the final window
    let mut state = manager.subscribe_robust_state();
    let wait = manager.config().robust.poll_interval() * 2;
    if tokio::time::timeout(wait, state.wait_for(|s| s.is_ready())).await.is_err() {
        info!(
            "Robust window {:.0}% full at end of replay",
            manager.robust_fill_ratio() * 100.0
        );
    }

    let export = manager.session_export();
    manager.stop_robust_calculation();

    print!("{}", report::render(&export));
    if options.json {
        println!("{}", serde_json::to_string(&export)?);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = Options::parse(env::args().skip(1))?;
    let config = match &options.config_path {
        Some(path) => Config::try_load_from_path(path).with_context(|| format!("loading {path}"))?,
        None => Config::load(),
    };
    info!(
        "ECG {} Hz, accel {} Hz, config {}",
        config.ecg.sampling_rate_hz,
        config.accel.sampling_rate_hz,
        options.config_path.as_deref().unwrap_or(CONFIG_FILE)
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(replay(&options, config))
}
