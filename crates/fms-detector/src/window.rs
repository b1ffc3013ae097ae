//! Bounded rolling window of recent values for one tag

use std::collections::VecDeque;

/// Summary statistics over a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// Number of samples
    pub count: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Population standard deviation
    pub stddev: f64,
}

/// FIFO window holding at most `capacity` values
#[derive(Debug, Clone)]
pub struct TagWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl TagWindow {
    /// Create an empty window. A zero capacity is raised to one.
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, evicting and returning the oldest one when full
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.values.len() == self.capacity {
            self.values.pop_front()
        } else {
            None
        };
        self.values.push_back(value);
        evicted
    }

    /// Number of values held
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the window holds no values
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum number of values held
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Values from oldest to newest
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    /// Mean and population standard deviation, `None` when empty
    #[must_use]
    pub fn stats(&self) -> Option<WindowStats> {
        if self.values.is_empty() {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let n = self.values.len() as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let variance = self
            .values
            .iter()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f64>()
            / n;

        Some(WindowStats {
            count: self.values.len(),
            mean,
            stddev: variance.sqrt(),
        })
    }
}
