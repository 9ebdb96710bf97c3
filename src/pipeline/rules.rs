//! Threshold rule engine for raw telemetry
//!
//! Stateless: one message in, zero to three events out. The three checks
//! are independent and additive.
//!
//! # Rules
//! - **SPEED_OVER_LIMIT**: speed > `speed_max`
//! - **RPM_OVER_LIMIT**: rpm > `rpm_max`
//! - **HARD_BRAKE_AT_HIGH_SPEED**: brake engaged AND speed > `brake_alert_speed`

use super::normalizer::{self, TelemetryMessage};
use super::types::{EventType, TelemetryEvent};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Field '{field}' is not numeric: {value}")]
    NotNumeric { field: &'static str, value: Value },

    #[error("Field '{field}' is not a boolean: {value}")]
    NotBoolean { field: &'static str, value: Value },
}

/// Configured limits for the three rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleLimits {
    pub speed_max: f64,
    pub rpm_max: f64,
    pub brake_alert_speed: f64,
}

impl Default for RuleLimits {
    fn default() -> Self {
        Self {
            speed_max: 310.0,
            rpm_max: 11_500.0,
            brake_alert_speed: 280.0,
        }
    }
}

pub struct RuleEngine {
    limits: RuleLimits,
}

impl RuleEngine {
    pub fn new(limits: RuleLimits) -> Self {
        Self { limits }
    }

    pub fn with_defaults() -> Self {
        Self::new(RuleLimits::default())
    }

    /// Evaluate every rule against one message
    ///
    /// Missing numeric fields count as 0 and missing booleans as false. A
    /// field that is present but cannot be coerced aborts evaluation: the
    /// failure is logged and no events are returned.
    pub fn evaluate(&self, msg: &TelemetryMessage) -> Vec<TelemetryEvent> {
        match self.try_evaluate(msg) {
            Ok(events) => events,
            Err(e) => {
                log::error!("❌ Error detecting events: {}", e);
                Vec::new()
            }
        }
    }

    fn try_evaluate(&self, msg: &TelemetryMessage) -> Result<Vec<TelemetryEvent>, RuleError> {
        let speed = numeric(msg, normalizer::SPEED)?;
        let rpm = numeric(msg, normalizer::RPM)?;
        let brake = boolean(msg, normalizer::BRAKE)?;

        let mut events = Vec::new();
        let driver = msg.get_or_null(normalizer::DRIVER);

        if speed > self.limits.speed_max {
            log::warn!(
                "🚨 SPEED_OVER_LIMIT: {} - {} km/h > {}",
                driver, speed, self.limits.speed_max
            );
            events.push(self.make_event(msg, EventType::SpeedOverLimit, speed, self.limits.speed_max));
        }

        if rpm > self.limits.rpm_max {
            log::warn!(
                "🚨 RPM_OVER_LIMIT: {} - {} RPM > {}",
                driver, rpm, self.limits.rpm_max
            );
            events.push(self.make_event(msg, EventType::RpmOverLimit, rpm, self.limits.rpm_max));
        }

        if brake && speed > self.limits.brake_alert_speed {
            log::warn!(
                "🚨 HARD_BRAKE_AT_HIGH_SPEED: {} - braking at {} km/h",
                driver, speed
            );
            events.push(self.make_event(
                msg,
                EventType::HardBrakeAtHighSpeed,
                speed,
                self.limits.brake_alert_speed,
            ));
        }

        Ok(events)
    }

    fn make_event(
        &self,
        msg: &TelemetryMessage,
        event_type: EventType,
        value: f64,
        limit: f64,
    ) -> TelemetryEvent {
        TelemetryEvent {
            driver: msg.get_or_null(normalizer::DRIVER),
            lap_number: msg.get_or_null(normalizer::LAP_NUMBER),
            timestamp_utc: normalize_timestamp(&msg.get_or_null(normalizer::TIMESTAMP)),
            x: msg.get_or_null(normalizer::X),
            y: msg.get_or_null(normalizer::Y),
            event_type,
            value,
            limit,
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn numeric(msg: &TelemetryMessage, field: &'static str) -> Result<f64, RuleError> {
    match msg.get(field) {
        None => Ok(0.0),
        Some(value) => normalizer::coerce_f64(value).ok_or_else(|| RuleError::NotNumeric {
            field,
            value: value.clone(),
        }),
    }
}

fn boolean(msg: &TelemetryMessage, field: &'static str) -> Result<bool, RuleError> {
    match msg.get(field) {
        None => Ok(false),
        Some(value) => normalizer::coerce_bool(value).ok_or_else(|| RuleError::NotBoolean {
            field,
            value: value.clone(),
        }),
    }
}

/// Re-emit a parseable timestamp as RFC 3339 UTC, pass anything else through
///
/// Accepts RFC 3339 and `YYYY-MM-DD HH:MM:SS[.f]` / `YYYY-MM-DDTHH:MM:SS[.f]`
/// (the latter two assumed UTC).
///
/// UTC is written with a `Z` suffix, not `+00:00`. Consumers that compare
/// timestamps as strings must parse them instead.
pub fn normalize_timestamp(value: &Value) -> Value {
    let Value::String(raw) = value else {
        return value.clone();
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Value::String(
            ts.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Value::String(
                naive
                    .and_utc()
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            );
        }
    }

    value.clone()
}
