//! # Rolling Buffers
//!
//! Fixed-capacity FIFO used for every retained series: raw ECG (display, HRV and
//! robust windows), vertical acceleration, RR intervals and the live-metric history.
//!
//! Capacity is derived once from `sampling_rate × window_seconds` and never changes.
//! Appending is the only mutation; when the buffer is over capacity the oldest
//! elements are evicted from the front. Readers take owned [`RollingBuffer::snapshot`]
//! copies so a detector never observes the buffer changing under it.

use std::collections::VecDeque;

/// Storage reserved up front; larger buffers grow on demand.
const PREALLOCATE_LIMIT: usize = 4096;

/// Fixed-capacity, time-ordered FIFO container.
///
/// # Example
/// ```
/// use hrv_tracker_lib::rolling_buffer::RollingBuffer;
///
/// let mut buffer = RollingBuffer::new(3);
/// buffer.extend([1, 2, 3, 4, 5]);
/// assert_eq!(buffer.snapshot(), vec![3, 4, 5]);
/// assert_eq!(buffer.total_pushed(), 5);
/// ```
#[derive(Clone, Debug)]
pub struct RollingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    total_pushed: u64,
}

impl<T> RollingBuffer<T> {
    /// Create an empty buffer. A capacity of zero is raised to one so the
    /// buffer can always hold the latest element.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        RollingBuffer {
            items: VecDeque::with_capacity(capacity.min(PREALLOCATE_LIMIT)),
            capacity,
            total_pushed: 0,
        }
    }

    /// Create a buffer sized for `window_seconds` of a stream sampled at `sampling_rate_hz`.
    pub fn with_window(sampling_rate_hz: f64, window_seconds: f64) -> Self {
        Self::new(window_capacity(sampling_rate_hz, window_seconds))
    }

    /// Append one element, evicting the oldest when full.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
        self.total_pushed += 1;
    }

    /// Append a batch in order.
    pub fn extend<I: IntoIterator<Item = T>>(&mut self, batch: I) {
        for item in batch {
            self.push(item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of elements ever appended, including evicted ones.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// `len / capacity`, in [0, 1].
    pub fn fill_ratio(&self) -> f64 {
        self.items.len() as f64 / self.capacity as f64
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.total_pushed = 0;
    }
}

impl<T: Clone> RollingBuffer<T> {
    /// Owned copy of the retained elements, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Element count for `window_seconds` at `sampling_rate_hz`, at least one.
pub fn window_capacity(sampling_rate_hz: f64, window_seconds: f64) -> usize {
    let samples = (sampling_rate_hz * window_seconds).round();
    if samples.is_finite() && samples >= 1.0 {
        samples as usize
    } else {
        1
    }
}
