//! In-process message bus
//!
//! Keeps a log of everything published and fans messages out to live
//! subscribers over a broadcast channel.

use super::{BusError, MessageSink};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
    log: Mutex<Vec<BusMessage>>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to messages published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    /// Every message published to `topic`, in publish order
    pub fn published(&self, topic: &str) -> Vec<BusMessage> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Decode every JSON payload published to `topic`, skipping undecodable ones
    pub fn published_json<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.published(topic)
            .iter()
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl MessageSink for MemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };

        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());

        // No live subscribers is not an error
        let _ = self.sender.send(message);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
