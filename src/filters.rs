//! Signal filtering primitives shared by the ingest path and the detectors.
//!
//! Everything here is a pure function over a slice and returns a new vector of the
//! same length (or a scalar). Empty input is always valid and yields empty output
//! or zero, so callers never need to guard cold starts themselves.

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median, 0 for an empty slice. NaNs sort last.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation from the median.
pub fn median_abs_deviation(values: &[f64]) -> f64 {
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Subtract the slice mean from every value.
pub fn demean(values: &[f64]) -> Vec<f64> {
    let offset = mean(values);
    values.iter().map(|v| v - offset).collect()
}

/// Clamp every value into `[-limit, limit]`.
pub fn clamp_all(values: &[f64], limit: f64) -> Vec<f64> {
    let limit = limit.abs();
    values.iter().map(|v| v.clamp(-limit, limit)).collect()
}

/// Centred moving average. The window shrinks at the edges instead of padding,
/// so output has no phase lag and no edge bias towards zero.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    if n == 0 || window <= 1 {
        return values.to_vec();
    }

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    let mut running = 0.0;
    for v in values {
        running += v;
        prefix.push(running);
    }

    let left = (window - 1) / 2;
    let right = window / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(left);
            let hi = (i + right + 1).min(n);
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// High-pass by subtracting a centred moving average of `window` samples.
pub fn high_pass_moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let baseline = moving_average(values, window);
    values.iter().zip(baseline).map(|(v, b)| v - b).collect()
}

/// First difference; the first output sample is defined as zero.
pub fn first_difference(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(0.0);
    out.extend(values.windows(2).map(|w| w[1] - w[0]));
    out
}

/// Pointwise square.
pub fn square(values: &[f64]) -> Vec<f64> {
    values.iter().map(|v| v * v).collect()
}

/// Single-pole RC high-pass: `y[i] = α·(y[i-1] + x[i] - x[i-1])` with
/// `α = RC / (RC + dt)`. The filter starts settled on the first sample, so a
/// constant input produces exactly zero.
pub fn single_pole_high_pass(values: &[f64], cutoff_hz: f64, sampling_rate_hz: f64) -> Vec<f64> {
    if values.is_empty() || cutoff_hz <= 0.0 || sampling_rate_hz <= 0.0 {
        return values.to_vec();
    }
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff_hz);
    let dt = 1.0 / sampling_rate_hz;
    let alpha = rc / (rc + dt);

    let mut out = Vec::with_capacity(values.len());
    let mut prev_in = values[0];
    let mut prev_out = 0.0;
    for &x in values {
        let y = alpha * (prev_out + x - prev_in);
        out.push(y);
        prev_in = x;
        prev_out = y;
    }
    out
}

/// Index of the largest value in `values[lo..hi]` (bounds clipped). Ties keep
/// the earliest index.
pub fn argmax_in(values: &[f64], lo: usize, hi: usize) -> Option<usize> {
    let hi = hi.min(values.len());
    if lo >= hi {
        return None;
    }
    let mut best = lo;
    for i in lo + 1..hi {
        if values[i] > values[best] {
            best = i;
        }
    }
    Some(best)
}

/// Convert seconds to a sample count at `sampling_rate_hz`, never below `min`.
pub fn seconds_to_samples(seconds: f64, sampling_rate_hz: f64, min: usize) -> usize {
    let samples = (seconds * sampling_rate_hz).round();
    if samples.is_finite() && samples > min as f64 {
        samples as usize
    } else {
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_inputs() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median_abs_deviation(&[]), 0.0);
        assert!(moving_average(&[], 5).is_empty());
        assert!(first_difference(&[]).is_empty());
        assert!(single_pole_high_pass(&[], 0.5, 100.0).is_empty());
        assert_eq!(argmax_in(&[], 0, 10), None);
    }

    #[test]
    fn test_median_and_mad() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        // One outlier does not move the MAD
        assert_eq!(median_abs_deviation(&[1.0, 1.0, 2.0, 2.0, 100.0]), 1.0);
    }

    #[test]
    fn test_demean_and_clamp() {
        let centered = demean(&[1.0, 2.0, 3.0]);
        assert_eq!(centered, vec![-1.0, 0.0, 1.0]);
        assert_eq!(clamp_all(&[-5.0, 0.5, 9.0], 3.0), vec![-3.0, 0.5, 3.0]);
    }

    #[test]
    fn test_moving_average_centred() {
        let smoothed = moving_average(&[0.0, 0.0, 3.0, 0.0, 0.0], 3);
        assert_eq!(smoothed, vec![0.0, 1.0, 1.0, 1.0, 0.0]);

        // Constant input is preserved at the edges too
        let flat = moving_average(&[2.0; 7], 4);
        assert!(flat.iter().all(|v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_first_difference() {
        assert_eq!(first_difference(&[1.0, 4.0, 2.0]), vec![0.0, 3.0, -2.0]);
    }

    #[test]
    fn test_single_pole_high_pass_removes_offset() {
        let constant = vec![1.0; 500];
        let out = single_pole_high_pass(&constant, 0.5, 100.0);
        assert!(out.iter().all(|v| v.abs() < 1e-12));

        // A step decays back towards zero
        let mut step = vec![0.0; 100];
        step.extend(vec![1.0; 400]);
        let out = single_pole_high_pass(&step, 0.5, 100.0);
        assert!(out[100] > 0.9);
        assert!(out[499].abs() < 0.01);
    }

    #[test]
    fn test_argmax_and_samples() {
        let values = [1.0, 5.0, 3.0, 5.0, 2.0];
        assert_eq!(argmax_in(&values, 0, 5), Some(1));
        assert_eq!(argmax_in(&values, 2, 100), Some(3));
        assert_eq!(seconds_to_samples(0.12, 130.0, 1), 16);
        assert_eq!(seconds_to_samples(0.0, 130.0, 3), 3);
    }
}
