//! NATS adapter (async-nats) for enriched prediction output

use super::{BusError, MessageSink};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

pub struct NatsSink {
    client: async_nats::Client,
}

impl NatsSink {
    /// Connect to a NATS server
    ///
    /// # Arguments
    /// * `url` - Server URL (e.g. `nats://nats:4222`)
    /// * `timeout` - Connection timeout
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, BusError> {
        log::info!("🔌 Connecting to NATS at {}", url);

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .map_err(|e| BusError::Nats(e.to_string()))?;

        log::info!("✅ Connected to NATS at {}", url);
        Ok(Self { client })
    }

    /// Flush buffered publishes to the server
    pub async fn flush(&self) -> Result<(), BusError> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Nats(e.to_string()))
    }
}

#[async_trait]
impl MessageSink for NatsSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(topic.to_string(), Bytes::from(payload))
            .await
            .map_err(|e| BusError::Nats(e.to_string()))
    }

    fn backend_type(&self) -> &'static str {
        "nats"
    }
}
