//! Pipeline configuration from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must not be empty")]
    Empty { name: &'static str },

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Configuration for the analytics runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,

    /// Raw telemetry input topic
    pub mqtt_topic_raw: String,

    /// Rule event output topic
    pub mqtt_topic_events: String,

    /// MQTT QoS level (0-2)
    pub mqtt_qos: u8,

    pub nats_url: String,

    /// Enriched prediction output subject
    pub nats_topic: String,

    /// Base URL of the lap-time predictor service
    pub mlaas_url: String,

    /// Seconds without a sample before a lap counts as complete
    pub lap_completion_threshold_secs: u64,

    /// A lap needs strictly more samples than this to be summarized
    pub min_lap_samples: usize,

    pub scan_interval_ms: u64,
    pub health_check_interval_ms: u64,
    pub predict_timeout_ms: u64,

    pub rule_speed_max: f64,
    pub rule_rpm_max: f64,
    pub rule_brake_alert_speed: f64,

    /// Ingest channel capacity (messages)
    pub ingest_channel_buffer: usize,

    /// Cap on concurrently open laps (0 = unbounded)
    pub max_open_windows: usize,

    pub recent_predictions_capacity: usize,

    /// Cap on full prediction history (0 = unbounded)
    pub history_max_records: usize,

    /// Startup connect timeout for MQTT and NATS
    pub connect_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "mqtt".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: "analytics-service".to_string(),
            mqtt_topic_raw: "telemetry/raw".to_string(),
            mqtt_topic_events: "telemetry/events".to_string(),
            mqtt_qos: 1,
            nats_url: "nats://nats:4222".to_string(),
            nats_topic: "telemetry.predictions".to_string(),
            mlaas_url: "http://mlaas:8000".to_string(),
            lap_completion_threshold_secs: 10,
            min_lap_samples: 10,
            scan_interval_ms: 5_000,
            health_check_interval_ms: 30_000,
            predict_timeout_ms: 5_000,
            rule_speed_max: 310.0,
            rule_rpm_max: 11_500.0,
            rule_brake_alert_speed: 280.0,
            ingest_channel_buffer: 10_000,
            max_open_windows: 10_000,
            recent_predictions_capacity: 50,
            history_max_records: 0,
            connect_timeout_ms: 10_000,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `MQTT_HOST` (default: mqtt), `MQTT_PORT` (default: 1883)
    /// - `MQTT_CLIENT_ID` (default: analytics-service)
    /// - `MQTT_TOPIC_RAW`, falling back to `MQTT_TOPIC` (default: telemetry/raw)
    /// - `MQTT_TOPIC_EVENTS` (default: telemetry/events)
    /// - `MQTT_QOS` (default: 1)
    /// - `NATS_URL` (default: nats://nats:4222)
    /// - `NATS_TOPIC` (default: telemetry.predictions)
    /// - `MLAAS_URL` (default: http://mlaas:8000)
    /// - `LAP_COMPLETION_THRESHOLD` seconds (default: 10)
    /// - `MIN_LAP_SAMPLES` (default: 10)
    /// - `SCAN_INTERVAL_MS` (default: 5000)
    /// - `HEALTH_CHECK_INTERVAL_MS` (default: 30000)
    /// - `PREDICT_TIMEOUT_MS` (default: 5000)
    /// - `RULE_SPEED_MAX` / `RULE_RPM_MAX` / `RULE_BRAKE_ALERT_SPEED`
    ///   (default: 310 / 11500 / 280)
    /// - `INGEST_CHANNEL_BUFFER` (default: 10000)
    /// - `MAX_OPEN_WINDOWS` (default: 10000, 0 = unbounded)
    /// - `RECENT_PREDICTIONS_CAPACITY` (default: 50)
    /// - `HISTORY_MAX_RECORDS` (default: 0 = unbounded)
    /// - `CONNECT_TIMEOUT_MS` (default: 10000)
    ///
    /// Unparseable numbers fall back to the default with a warning; call
    /// `validate` to reject out-of-range values.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            mqtt_host: env_string("MQTT_HOST", defaults.mqtt_host),
            mqtt_port: env_parse("MQTT_PORT", defaults.mqtt_port),
            mqtt_client_id: env_string("MQTT_CLIENT_ID", defaults.mqtt_client_id),
            mqtt_topic_raw: env::var("MQTT_TOPIC_RAW")
                .or_else(|_| env::var("MQTT_TOPIC"))
                .unwrap_or(defaults.mqtt_topic_raw),
            mqtt_topic_events: env_string("MQTT_TOPIC_EVENTS", defaults.mqtt_topic_events),
            mqtt_qos: env_parse("MQTT_QOS", defaults.mqtt_qos),
            nats_url: env_string("NATS_URL", defaults.nats_url),
            nats_topic: env_string("NATS_TOPIC", defaults.nats_topic),
            mlaas_url: env_string("MLAAS_URL", defaults.mlaas_url),
            lap_completion_threshold_secs: env_parse(
                "LAP_COMPLETION_THRESHOLD",
                defaults.lap_completion_threshold_secs,
            ),
            min_lap_samples: env_parse("MIN_LAP_SAMPLES", defaults.min_lap_samples),
            scan_interval_ms: env_parse("SCAN_INTERVAL_MS", defaults.scan_interval_ms),
            health_check_interval_ms: env_parse(
                "HEALTH_CHECK_INTERVAL_MS",
                defaults.health_check_interval_ms,
            ),
            predict_timeout_ms: env_parse("PREDICT_TIMEOUT_MS", defaults.predict_timeout_ms),
            rule_speed_max: env_parse("RULE_SPEED_MAX", defaults.rule_speed_max),
            rule_rpm_max: env_parse("RULE_RPM_MAX", defaults.rule_rpm_max),
            rule_brake_alert_speed: env_parse(
                "RULE_BRAKE_ALERT_SPEED",
                defaults.rule_brake_alert_speed,
            ),
            ingest_channel_buffer: env_parse(
                "INGEST_CHANNEL_BUFFER",
                defaults.ingest_channel_buffer,
            ),
            max_open_windows: env_parse("MAX_OPEN_WINDOWS", defaults.max_open_windows),
            recent_predictions_capacity: env_parse(
                "RECENT_PREDICTIONS_CAPACITY",
                defaults.recent_predictions_capacity,
            ),
            history_max_records: env_parse("HISTORY_MAX_RECORDS", defaults.history_max_records),
            connect_timeout_ms: env_parse("CONNECT_TIMEOUT_MS", defaults.connect_timeout_ms),
        }
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("MQTT_HOST", &self.mqtt_host),
            ("MQTT_CLIENT_ID", &self.mqtt_client_id),
            ("MQTT_TOPIC_RAW", &self.mqtt_topic_raw),
            ("MQTT_TOPIC_EVENTS", &self.mqtt_topic_events),
            ("NATS_URL", &self.nats_url),
            ("NATS_TOPIC", &self.nats_topic),
            ("MLAAS_URL", &self.mlaas_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty { name });
            }
        }

        if self.mqtt_port == 0 {
            return Err(ConfigError::Zero { name: "MQTT_PORT" });
        }

        if self.mqtt_qos > 2 {
            return Err(ConfigError::Invalid {
                name: "MQTT_QOS",
                reason: format!("expected 0, 1 or 2, got {}", self.mqtt_qos),
            });
        }

        if !(self.mlaas_url.starts_with("http://") || self.mlaas_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                name: "MLAAS_URL",
                reason: format!("expected an http(s) URL, got {}", self.mlaas_url),
            });
        }

        for (name, value) in [
            ("SCAN_INTERVAL_MS", self.scan_interval_ms),
            ("HEALTH_CHECK_INTERVAL_MS", self.health_check_interval_ms),
            ("PREDICT_TIMEOUT_MS", self.predict_timeout_ms),
            ("CONNECT_TIMEOUT_MS", self.connect_timeout_ms),
            ("INGEST_CHANNEL_BUFFER", self.ingest_channel_buffer as u64),
            ("RECENT_PREDICTIONS_CAPACITY", self.recent_predictions_capacity as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { name });
            }
        }

        for (name, value) in [
            ("RULE_SPEED_MAX", self.rule_speed_max),
            ("RULE_RPM_MAX", self.rule_rpm_max),
            ("RULE_BRAKE_ALERT_SPEED", self.rule_brake_alert_speed),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Invalid {
                    name,
                    reason: format!("expected a finite number, got {}", value),
                });
            }
        }

        Ok(())
    }

    pub fn lap_completion_threshold(&self) -> Duration {
        Duration::from_secs(self.lap_completion_threshold_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn predict_timeout(&self) -> Duration {
        Duration::from_millis(self.predict_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn env_string(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse<T: FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("⚠️  Ignoring unparseable {}={:?}, using {}", key, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
