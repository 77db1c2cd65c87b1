//! # Terminal Report
//!
//! ASCII rendering of the display window for development and headless use. The
//! ECG trace is downsampled to a fixed number of columns, detected R-peaks are
//! marked with `X`, and the latest metrics are printed underneath.

use std::fmt::Write;

use crate::ingest::SessionExport;
use crate::robust::RobustCalculationState;
use crate::{HrvSnapshot, JumpEvent};

const ROWS: usize = 16;
const COLUMNS: usize = 100;
const Y_AXIS_WIDTH: usize = 7; // Space for Y-axis labels

/// Render `values` (oldest first) as a character grid with beats marked.
pub fn chart(values: &[f64], beats: &[usize]) -> String {
    if values.is_empty() {
        return "(no ECG data yet)\n".to_string();
    }

    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| (min.min(*v), max.max(*v)));
    let range = if max - min > f64::EPSILON { max - min } else { 1.0 };
    let value_to_row = |value: f64| {
        let normalized = (value - min) / range;
        ((1.0 - normalized) * (ROWS as f64 - 1.0)).round().clamp(0.0, ROWS as f64 - 1.0) as usize
    };

    let columns = COLUMNS.min(values.len());
    let per_column = values.len() as f64 / columns as f64;
    let mut grid = vec![vec![' '; columns + Y_AXIS_WIDTH]; ROWS];

    // Labels at top, middle and bottom
    for (row, value) in [(0, max), (ROWS / 2, (max + min) / 2.0), (ROWS - 1, min)] {
        let label = format!("{:>width$.2}", value, width = Y_AXIS_WIDTH - 1);
        for (i, ch) in label.chars().take(Y_AXIS_WIDTH - 1).enumerate() {
            grid[row][i] = ch;
        }
    }
    for row in grid.iter_mut() {
        row[Y_AXIS_WIDTH - 1] = '│';
    }

    for column in 0..columns {
        let lo = (column as f64 * per_column) as usize;
        let hi = (((column + 1) as f64 * per_column) as usize).clamp(lo + 1, values.len());
        let bucket = &values[lo..hi];

        // Keep the extreme sample of each bucket so QRS spikes survive downsampling
        let extreme = bucket
            .iter()
            .copied()
            .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        let has_beat = beats.iter().any(|&b| b >= lo && b < hi);

        let row = value_to_row(extreme);
        grid[row][column + Y_AXIS_WIDTH] = if has_beat { 'X' } else { '•' };
    }

    let mut out = String::new();
    for row in grid {
        out.extend(row);
        out.push('\n');
    }
    out.push_str(&" ".repeat(Y_AXIS_WIDTH - 1));
    out.push('└');
    out.push_str(&"─".repeat(columns));
    out.push('\n');
    out
}

/// One-line summary of a snapshot.
pub fn format_snapshot(label: &str, snapshot: Option<&HrvSnapshot>) -> String {
    match snapshot {
        Some(s) => format!(
            "{label}: HR {:.1} BPM | RMSSD {:.1} ms | SDNN {:.1} ms | NN50 {} | pNN50 {:.1}% | {} beats / {:.0} s ({:?})",
            s.mean_hr_bpm, s.rmssd_ms, s.sdnn_ms, s.nn50, s.pnn50, s.beat_count, s.window_seconds, s.source
        ),
        None => format!("{label}: unavailable"),
    }
}

fn format_robust(state: &RobustCalculationState) -> String {
    if state.is_ready() {
        format_snapshot("Robust", state.last_snapshot.as_ref())
    } else {
        format!("Robust: calculating... {:.0}%", state.progress * 100.0)
    }
}

fn format_jumps(jumps: &[JumpEvent]) -> String {
    match jumps.iter().map(|j| j.height_cm).fold(None, |best: Option<f64>, h| {
        Some(best.map_or(h, |b| b.max(h)))
    }) {
        Some(best) => format!("Jumps: {} (best {:.1} cm)", jumps.len(), best),
        None => "Jumps: none".to_string(),
    }
}

/// Full report for a session: chart plus metric footer.
pub fn render(export: &SessionExport) -> String {
    let values: Vec<f64> = export.display_window.iter().map(|s| s.value).collect();
    let mut out = chart(&values, &export.detected_beats);

    let live = export.hrv_history.last();
    let _ = writeln!(out, "{}", format_snapshot("Live", live));
    let _ = writeln!(out, "{}", format_robust(&export.robust));
    let _ = writeln!(out, "{}", format_jumps(&export.jump_events));
    out
}
