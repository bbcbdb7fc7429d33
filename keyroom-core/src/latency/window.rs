//! Fixed-capacity rolling average

use crate::config::ConfigError;

/// Circular buffer keeping a running mean of the last `capacity` samples.
///
/// Insertion is O(1): the slot being overwritten is subtracted from the
/// running sum before the new value is added. The sum is compensated
/// (Neumaier) so rounding error does not build up over a long session.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buffer: Box<[f64]>,
    write_index: usize,
    filled: usize,
    running_sum: f64,
    /// Low-order bits lost from `running_sum`
    compensation: f64,
}

impl RollingWindow {
    /// Create an empty window. Capacity must be at least 1.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(Self {
            buffer: vec![0.0; capacity].into_boxed_slice(),
            write_index: 0,
            filled: 0,
            running_sum: 0.0,
            compensation: 0.0,
        })
    }

    /// Push a sample, evicting the oldest once full. Non-finite values are ignored.
    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }

        if self.filled == self.capacity() {
            self.accumulate(-self.buffer[self.write_index]);
        } else {
            self.filled += 1;
        }
        self.buffer[self.write_index] = value;
        self.accumulate(value);

        self.write_index = (self.write_index + 1) % self.capacity();
    }

    fn accumulate(&mut self, value: f64) {
        let sum = self.running_sum + value;
        if self.running_sum.abs() >= value.abs() {
            self.compensation += (self.running_sum - sum) + value;
        } else {
            self.compensation += (value - sum) + self.running_sum;
        }
        self.running_sum = sum;
    }

    /// Mean of the occupied slots, 0 when empty
    pub fn average(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        (self.running_sum + self.compensation) / self.filled as f64
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.capacity()
    }
}
