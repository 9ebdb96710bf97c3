//! Core data structures for the lap analytics pipeline
//!
//! Value objects that flow between pipeline stages:
//! - `Sample` - one typed telemetry reading with lap identity
//! - `WindowKey` - (driver, lap_number) identity of an open lap window
//! - `Summary` - aggregated snapshot of a closed lap window
//! - `TelemetryEvent` - threshold violation raised by the rule engine
//! - `PredictionResult` - lap time estimate returned by the predictor
//! - `EnrichedRecord` - published result (also what the history caches hold)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single telemetry reading with both identity fields present
///
/// Optional fields stay `None` when the incoming message did not carry them
/// (or carried something that could not be coerced). The aggregator only
/// accumulates fields that are `Some`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sample {
    pub driver: String,
    pub lap_number: i64,
    pub timestamp: Option<String>,
    pub speed: Option<f64>,
    pub throttle: Option<f64>,
    pub rpm: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub brake: Option<bool>,
    pub drs: Option<bool>,
    pub n_gear: Option<i64>,
}

impl Sample {
    pub fn new(driver: impl Into<String>, lap_number: i64) -> Self {
        Self {
            driver: driver.into(),
            lap_number,
            ..Default::default()
        }
    }

    pub fn key(&self) -> WindowKey {
        WindowKey::new(self.driver.clone(), self.lap_number)
    }
}

/// Identity of an open lap window
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub driver: String,
    pub lap_number: i64,
}

impl WindowKey {
    pub fn new(driver: impl Into<String>, lap_number: i64) -> Self {
        Self {
            driver: driver.into(),
            lap_number,
        }
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.driver, self.lap_number)
    }
}

/// Aggregated snapshot of a closed lap window
///
/// Continuous fields are `None` when no value for that field was observed
/// during the lap. `timestamp` is the drain time, not a sample time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub driver: String,
    pub lap_number: i64,
    pub speed: Option<f64>,
    pub throttle: Option<f64>,
    pub rpm: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub brake: bool,
    pub drs: bool,
    pub n_gear: Option<i64>,
    pub sample_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Rule engine event type tags (wire format is SCREAMING_SNAKE_CASE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SpeedOverLimit,
    RpmOverLimit,
    HardBrakeAtHighSpeed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SpeedOverLimit => "SPEED_OVER_LIMIT",
            EventType::RpmOverLimit => "RPM_OVER_LIMIT",
            EventType::HardBrakeAtHighSpeed => "HARD_BRAKE_AT_HIGH_SPEED",
        }
    }
}

/// Threshold violation derived from exactly one telemetry message
///
/// Identity and position fields are copied verbatim from the message, so
/// they may be null when the message lacked them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub driver: Value,
    #[serde(rename = "lapNumber")]
    pub lap_number: Value,
    #[serde(rename = "timestampUtc")]
    pub timestamp_utc: Value,
    pub x: Value,
    pub y: Value,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub value: f64,
    pub limit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Lap time estimate returned by the predictor
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub predicted_lap_time: f64,
    pub confidence_interval: ConfidenceInterval,
    pub model_version: String,
}

/// Raw aggregate fields re-exposed on the published record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualTelemetry {
    pub avg_speed: Option<f64>,
    /// Throttle on a 0-1 scale
    pub avg_throttle: Option<f64>,
    pub avg_rpm: Option<f64>,
    pub used_drs: bool,
    pub used_brake: bool,
}

/// Enriched result published on the predictions topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub driver: String,
    pub lap_number: i64,
    pub predicted_lap_time: f64,
    pub confidence_interval: ConfidenceInterval,
    pub actual_telemetry: ActualTelemetry,
    pub timestamp: DateTime<Utc>,
    pub model_version: String,
}

impl EnrichedRecord {
    /// Build the published record from a lap summary and its prediction
    ///
    /// # Arguments
    /// * `summary` - Closed lap summary
    /// * `prediction` - Predictor response for that summary
    /// * `published_at` - Publish time stamped on the record
    pub fn from_parts(
        summary: &Summary,
        prediction: &PredictionResult,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            driver: summary.driver.clone(),
            lap_number: summary.lap_number,
            predicted_lap_time: prediction.predicted_lap_time,
            confidence_interval: prediction.confidence_interval,
            actual_telemetry: ActualTelemetry {
                avg_speed: summary.speed,
                avg_throttle: summary.throttle.map(throttle_ratio),
                avg_rpm: summary.rpm,
                used_drs: summary.drs,
                used_brake: summary.brake,
            },
            timestamp: published_at,
            model_version: prediction.model_version.clone(),
        }
    }
}

/// Convert a 0-100 throttle percentage to a 0-1 ratio
pub fn throttle_ratio(percent: f64) -> f64 {
    percent / 100.0
}
