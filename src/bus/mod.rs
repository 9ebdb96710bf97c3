//! Message bus adapters
//!
//! - `mqtt` - telemetry ingest and rule-event output (rumqttc)
//! - `nats` - enriched prediction output (async-nats)
//! - `memory` - in-process bus for tests and local runs
//! - `backoff` - reconnect delay policy for the ingest listener

pub mod backoff;
pub mod memory;
pub mod mqtt;
pub mod nats;

use async_trait::async_trait;

pub use memory::{BusMessage, MemoryBus};
pub use mqtt::{MqttBus, MqttSettings};
pub use nats::NatsSink;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("MQTT client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error("MQTT connection error: {0}")]
    MqttConnection(#[from] rumqttc::ConnectionError),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("Invalid bus setting: {0}")]
    InvalidSetting(String),
}

/// Outbound side of a message bus
///
/// Publishing is fire-and-forget from the pipeline's point of view: callers
/// log failures and move on.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Publish one payload to one topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
