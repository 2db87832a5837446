use std::collections::VecDeque;

use rust_decimal::{Decimal, MathematicalOps};

/// Rolling window of the last `capacity` spread values.
///
/// A value equal to the current tail is ignored, so the window only moves when
/// the spread actually changes. Once full, every push evicts the oldest value.
#[derive(Debug, Clone)]
pub struct SpreadWindow {
    capacity: usize,
    values: VecDeque<Decimal>,
}

impl SpreadWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Returns `false` when the value repeated the tail and was skipped.
    pub fn push(&mut self, value: Decimal) -> bool {
        if self.values.back() == Some(&value) {
            return false;
        }
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.capacity > 0 && self.values.len() == self.capacity
    }

    pub fn last(&self) -> Option<Decimal> {
        self.values.back().copied()
    }

    pub fn values(&self) -> impl Iterator<Item = &Decimal> {
        self.values.iter()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn mean(&self) -> Option<Decimal> {
        if self.values.is_empty() {
            return None;
        }
        let sum: Decimal = self.values.iter().sum();
        Some(sum / Decimal::from(self.values.len()))
    }

    /// Standard deviation with a divisor of `n - 2`. Needs at least three values.
    pub fn std_dev(&self) -> Option<Decimal> {
        let n = self.values.len();
        if n < 3 {
            return None;
        }
        let mean = self.mean()?;
        let squares: Decimal = self
            .values
            .iter()
            .map(|v| {
                let d = *v - mean;
                d * d
            })
            .sum();
        (squares / Decimal::from(n - 2)).sqrt()
    }

    /// `mean - std_dev`
    pub fn lower_band(&self) -> Option<Decimal> {
        Some(self.mean()? - self.std_dev()?)
    }

    /// `mean + std_dev`
    pub fn upper_band(&self) -> Option<Decimal> {
        Some(self.mean()? + self.std_dev()?)
    }
}
