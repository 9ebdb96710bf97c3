//! Telemetry normalization at the ingestion boundary
//!
//! Publishers disagree on field spelling (`lapNumber`, `LapNumber`,
//! `lap_number`, `nGear`, `RPM`, ...). Every alias is folded onto one
//! canonical name here, once, before a message reaches the rule engine or
//! the window aggregator.

use super::types::Sample;
use serde_json::{Map, Value};

pub const DRIVER: &str = "driver";
pub const LAP_NUMBER: &str = "lap_number";
pub const TIMESTAMP: &str = "timestamp";
pub const SPEED: &str = "speed";
pub const THROTTLE: &str = "throttle";
pub const RPM: &str = "rpm";
pub const X: &str = "x";
pub const Y: &str = "y";
pub const BRAKE: &str = "brake";
pub const DRS: &str = "drs";
pub const N_GEAR: &str = "n_gear";

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Telemetry payload must be a JSON object")]
    NotAnObject,
}

/// Map an incoming field name onto its canonical name
///
/// Matching ignores case, `_` and `-`. Unknown fields return `None` and
/// are dropped.
pub fn canonical_name(key: &str) -> Option<&'static str> {
    let folded: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();

    match folded.as_str() {
        "driver" | "subject" => Some(DRIVER),
        "lapnumber" | "lap" => Some(LAP_NUMBER),
        "timestamputc" | "timestamp" | "time" => Some(TIMESTAMP),
        "speed" => Some(SPEED),
        "throttle" => Some(THROTTLE),
        "rpm" => Some(RPM),
        "x" => Some(X),
        "y" => Some(Y),
        "brake" => Some(BRAKE),
        "drs" => Some(DRS),
        "ngear" | "gear" => Some(N_GEAR),
        _ => None,
    }
}

/// Telemetry message with canonical field names
///
/// Values are kept as raw JSON so that the rule engine can apply its own
/// lenient coercion; `to_sample` produces the typed form for aggregation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryMessage {
    fields: Map<String, Value>,
}

impl TelemetryMessage {
    /// Parse and normalize a raw bus payload
    pub fn from_slice(payload: &[u8]) -> Result<Self, NormalizeError> {
        let value: Value = serde_json::from_slice(payload)?;
        Self::from_value(value)
    }

    /// Normalize an already-parsed JSON value
    ///
    /// When several spellings of the same field are present, the canonical
    /// spelling wins over aliases. Null values are treated as absent.
    pub fn from_value(value: Value) -> Result<Self, NormalizeError> {
        let Value::Object(raw) = value else {
            return Err(NormalizeError::NotAnObject);
        };

        let mut fields = Map::new();
        for (key, value) in raw {
            if value.is_null() {
                continue;
            }
            if let Some(name) = canonical_name(&key) {
                if key == name {
                    fields.insert(name.to_string(), value);
                } else {
                    fields.entry(name.to_string()).or_insert(value);
                }
            }
        }

        Ok(Self { fields })
    }

    /// Raw value of a canonical field, if present
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Raw value of a canonical field, `Null` when absent
    pub fn get_or_null(&self, field: &str) -> Value {
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

    pub fn driver(&self) -> Option<String> {
        match self.fields.get(DRIVER)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn lap_number(&self) -> Option<i64> {
        self.fields.get(LAP_NUMBER).and_then(coerce_i64)
    }

    /// Convert to a typed sample
    ///
    /// Returns `None` when either identity field is missing. Optional
    /// fields that cannot be coerced are left empty rather than rejected.
    pub fn to_sample(&self) -> Option<Sample> {
        let driver = self.driver()?;
        let lap_number = self.lap_number()?;

        let number = |field: &str| self.fields.get(field).and_then(coerce_f64);
        let flag = |field: &str| self.fields.get(field).and_then(coerce_bool);

        Some(Sample {
            driver,
            lap_number,
            timestamp: self.fields.get(TIMESTAMP).and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
            speed: number(SPEED),
            throttle: number(THROTTLE),
            rpm: number(RPM),
            x: number(X),
            y: number(Y),
            brake: flag(BRAKE),
            drs: flag(DRS),
            n_gear: self.fields.get(N_GEAR).and_then(coerce_i64),
        })
    }
}

/// Lenient numeric coercion: numbers, numeric strings and booleans
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Lenient boolean coercion: booleans, 0/1 numbers and common spellings
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Integer coercion accepting integral floats (`3.0`) and numeric strings
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|v| v.fract() == 0.0 && v.is_finite())
                .map(|v| v as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|v| v.fract() == 0.0 && v.is_finite())
                    .map(|v| v as i64)
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_camel_case_payload() {
        let payload = br#"{"driver":"VER","timestampUtc":"2024-03-02T15:04:05Z","lapNumber":4,"x":101.5,"y":-33.0,"speed":287.0,"throttle":99.0,"brake":false,"nGear":7,"rpm":11020.0,"drs":true}"#;

        let msg = TelemetryMessage::from_slice(payload).unwrap();
        let sample = msg.to_sample().unwrap();

        assert_eq!(sample.driver, "VER");
        assert_eq!(sample.lap_number, 4);
        assert_eq!(sample.timestamp.as_deref(), Some("2024-03-02T15:04:05Z"));
        assert_eq!(sample.speed, Some(287.0));
        assert_eq!(sample.n_gear, Some(7));
        assert_eq!(sample.brake, Some(false));
        assert_eq!(sample.drs, Some(true));
    }

    #[test]
    fn test_aliases_and_casing_fold_to_canonical_names() {
        assert_eq!(canonical_name("LapNumber"), Some(LAP_NUMBER));
        assert_eq!(canonical_name("lap_number"), Some(LAP_NUMBER));
        assert_eq!(canonical_name("lapNumber"), Some(LAP_NUMBER));
        assert_eq!(canonical_name("NGear"), Some(N_GEAR));
        assert_eq!(canonical_name("n_gear"), Some(N_GEAR));
        assert_eq!(canonical_name("RPM"), Some(RPM));
        assert_eq!(canonical_name("timestamp_utc"), Some(TIMESTAMP));
        assert_eq!(canonical_name("unrelated"), None);
    }

    #[test]
    fn test_missing_identity_yields_no_sample() {
        let no_lap = TelemetryMessage::from_value(json!({"driver": "HAM", "speed": 200})).unwrap();
        assert!(no_lap.to_sample().is_none());

        let no_driver = TelemetryMessage::from_value(json!({"lapNumber": 3, "speed": 200})).unwrap();
        assert!(no_driver.to_sample().is_none());

        let blank_driver =
            TelemetryMessage::from_value(json!({"driver": "  ", "lapNumber": 3})).unwrap();
        assert!(blank_driver.to_sample().is_none());
    }

    #[test]
    fn test_canonical_spelling_wins_over_aliases() {
        let msg = TelemetryMessage::from_value(json!({
            "lapNumber": null,
            "lap_number": 9,
            "LapNumber": 10,
            "driver": "NOR"
        }))
        .unwrap();

        assert_eq!(msg.lap_number(), Some(9));
    }

    #[test]
    fn test_malformed_optional_fields_are_left_empty() {
        let msg = TelemetryMessage::from_value(json!({
            "driver": "ALO",
            "lapNumber": "12",
            "speed": "fast",
            "rpm": "10500",
            "brake": "maybe",
            "drs": 1
        }))
        .unwrap();

        let sample = msg.to_sample().unwrap();
        assert_eq!(sample.lap_number, 12);
        assert_eq!(sample.speed, None);
        assert_eq!(sample.rpm, Some(10500.0));
        assert_eq!(sample.brake, None);
        assert_eq!(sample.drs, Some(true));
    }

    #[test]
    fn test_rejects_non_object_payloads() {
        assert!(matches!(
            TelemetryMessage::from_slice(b"[1,2,3]"),
            Err(NormalizeError::NotAnObject)
        ));
        assert!(matches!(
            TelemetryMessage::from_slice(br#"{"invalid": "json"#),
            Err(NormalizeError::Json(_))
        ));
    }

    #[test]
    fn test_integral_float_lap_number() {
        assert_eq!(coerce_i64(&json!(3.0)), Some(3));
        assert_eq!(coerce_i64(&json!(3.5)), None);
        assert_eq!(coerce_i64(&json!("4.0")), Some(4));
    }
}
