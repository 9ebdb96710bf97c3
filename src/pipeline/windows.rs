//! Per-lap window state and aggregation
//!
//! A `WindowState` accumulates every observed value of every field for one
//! (driver, lap_number) key. Nothing is imputed: a field that never showed
//! up simply has an empty series and aggregates to `None`.

use super::types::{Sample, Summary, WindowKey};
use chrono::{DateTime, Utc};

/// In-progress accumulation for one lap window
#[derive(Debug, Clone, Default)]
pub struct WindowState {
    speed: Vec<f64>,
    throttle: Vec<f64>,
    rpm: Vec<f64>,
    x: Vec<f64>,
    y: Vec<f64>,
    brake: Vec<bool>,
    drs: Vec<bool>,
    n_gear: Vec<i64>,
    sample_count: usize,
    first_seen_ms: i64,
    last_seen_ms: i64,
}

impl WindowState {
    /// Create a window from its first sample
    ///
    /// There is no empty constructor: a window always holds at least one
    /// sample.
    pub fn open(sample: &Sample, now_ms: i64) -> Self {
        let mut state = Self {
            first_seen_ms: now_ms,
            last_seen_ms: now_ms,
            ..Default::default()
        };
        state.push(sample, now_ms);
        state
    }

    /// Append every present field of `sample` and advance `last_seen`
    pub fn push(&mut self, sample: &Sample, now_ms: i64) {
        if let Some(v) = sample.speed {
            self.speed.push(v);
        }
        if let Some(v) = sample.throttle {
            self.throttle.push(v);
        }
        if let Some(v) = sample.rpm {
            self.rpm.push(v);
        }
        if let Some(v) = sample.x {
            self.x.push(v);
        }
        if let Some(v) = sample.y {
            self.y.push(v);
        }
        if let Some(v) = sample.brake {
            self.brake.push(v);
        }
        if let Some(v) = sample.drs {
            self.drs.push(v);
        }
        if let Some(v) = sample.n_gear {
            self.n_gear.push(v);
        }

        self.sample_count += 1;
        self.last_seen_ms = self.last_seen_ms.max(now_ms);
    }

    pub fn len(&self) -> usize {
        self.sample_count
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }

    pub fn first_seen_ms(&self) -> i64 {
        self.first_seen_ms
    }

    pub fn last_seen_ms(&self) -> i64 {
        self.last_seen_ms
    }

    /// Whether the window has been quiet for longer than `threshold_ms`
    pub fn is_inactive(&self, now_ms: i64, threshold_ms: i64) -> bool {
        now_ms - self.last_seen_ms > threshold_ms
    }

    /// Build the immutable lap summary
    ///
    /// # Arguments
    /// * `key` - Window identity copied onto the summary
    /// * `drained_at` - Drain time stamped on the summary
    pub fn summarize(&self, key: &WindowKey, drained_at: DateTime<Utc>) -> Summary {
        Summary {
            driver: key.driver.clone(),
            lap_number: key.lap_number,
            speed: mean(&self.speed),
            throttle: mean(&self.throttle),
            rpm: mean(&self.rpm),
            x: mean(&self.x),
            y: mean(&self.y),
            brake: self.brake.iter().any(|b| *b),
            drs: self.drs.iter().any(|b| *b),
            n_gear: rounded_mean(&self.n_gear),
            sample_count: self.sample_count,
            timestamp: drained_at,
        }
    }
}

/// Arithmetic mean, `None` for an empty series
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean of a discrete series rounded to the nearest integer
pub fn rounded_mean(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let total: f64 = values.iter().map(|v| *v as f64).sum();
    Some((total / values.len() as f64).round() as i64)
}
