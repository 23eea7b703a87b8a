//! Forecast bounds over a trailing history
//!
//! The rate detector only depends on [`Forecaster`]; [`StandardScoreForecaster`]
//! is the mean ± z·stddev model used by default.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Expected value and its acceptance band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Produces a forecast from trailing observations, oldest first
pub trait Forecaster: Send + Sync {
    /// `None` when the history is too short to forecast
    fn forecast(&self, history: &[f64]) -> Option<Forecast>;
}

/// Mean with a symmetric band of `z` sample standard deviations
#[derive(Debug, Clone)]
pub struct StandardScoreForecaster {
    z: f64,
    /// Keeps a perfectly flat history from flagging every +1
    min_std_dev: f64,
}

impl StandardScoreForecaster {
    pub fn new(z: f64, min_std_dev: f64) -> Self {
        Self { z, min_std_dev }
    }
}

impl Forecaster for StandardScoreForecaster {
    fn forecast(&self, history: &[f64]) -> Option<Forecast> {
        if history.is_empty() {
            return None;
        }
        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let variance = if history.len() > 1 {
            history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        let std_dev = variance.sqrt().max(self.min_std_dev);

        Some(Forecast {
            value: mean,
            // Counts cannot go negative
            lower: (mean - self.z * std_dev).max(0.0),
            upper: mean + self.z * std_dev,
        })
    }
}

/// Fixed-capacity ring of recent values; oldest evicted on insert once full
#[derive(Debug, Clone)]
pub struct TrailingHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl TrailingHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values oldest first
    pub fn as_slice(&mut self) -> &[f64] {
        self.values.make_contiguous()
    }
}
