//! lapflow - streaming lap analytics for vehicle telemetry
//!
//! Raw telemetry arrives on MQTT, is scanned by threshold rules and grouped
//! into per-(driver, lap) windows. Completed laps are summarized, sent to an
//! external lap-time predictor and the enriched result is republished on NATS.

pub mod bus;
pub mod pipeline;
