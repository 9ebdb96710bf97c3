//! Pipeline ingestion - bus payloads into the rule engine and aggregator
//!
//! The bus client delivers payloads on its own task. `IngestHandle::offer`
//! runs there: it normalizes the payload and hands it to a bounded channel
//! with a non-blocking `try_send`. One consumer (`start_ingestion`) drains
//! the channel, publishes rule events and feeds the window aggregator, so
//! the aggregator sees a single writer on the ingest side.

use super::aggregator::{AddOutcome, WindowAggregator};
use super::normalizer::TelemetryMessage;
use super::rules::RuleEngine;
use crate::bus::MessageSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Log a throughput line every this many consumed messages
const STATS_LOG_EVERY: u64 = 100;

/// Ingest counters (shared between the bus task and the consumer)
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    malformed: AtomicU64,
    overflow_dropped: AtomicU64,
    processed: AtomicU64,
    without_identity: AtomicU64,
    samples_aggregated: AtomicU64,
    events_detected: AtomicU64,
    events_published: AtomicU64,
    event_publish_failures: AtomicU64,
}

/// Point-in-time copy of `IngestStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub overflow_dropped: u64,
    pub processed: u64,
    pub without_identity: u64,
    pub samples_aggregated: u64,
    pub events_detected: u64,
    pub events_published: u64,
    pub event_publish_failures: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            without_identity: self.without_identity.load(Ordering::Relaxed),
            samples_aggregated: self.samples_aggregated.load(Ordering::Relaxed),
            events_detected: self.events_detected.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            event_publish_failures: self.event_publish_failures.load(Ordering::Relaxed),
        }
    }
}

/// Producer side of the ingest channel, handed to bus listeners
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<TelemetryMessage>,
    stats: Arc<IngestStats>,
}

impl IngestHandle {
    /// Create the ingest channel
    ///
    /// # Returns
    /// The producer handle and the receiver for `start_ingestion`
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<TelemetryMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                stats: Arc::new(IngestStats::default()),
            },
            rx,
        )
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Normalize a raw payload and enqueue it
    ///
    /// Malformed payloads are dropped quietly (debug log only) and counted.
    /// Returns whether the message was enqueued.
    pub fn offer(&self, payload: &[u8]) -> bool {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        match TelemetryMessage::from_slice(payload) {
            Ok(msg) => self.enqueue(msg),
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                log::debug!("Dropping malformed telemetry payload: {}", e);
                false
            }
        }
    }

    fn enqueue(&self, msg: TelemetryMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.overflow_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    log::warn!(
                        "⚠️  Ingest channel full ({} slots), dropping telemetry (total dropped: {})",
                        self.tx.max_capacity(),
                        dropped
                    );
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Ingest channel closed, dropping telemetry");
                false
            }
        }
    }
}

/// Consume normalized telemetry until every producer handle is dropped
///
/// For each message:
/// 1. Evaluate the rule engine and publish each event individually
/// 2. Convert to a typed sample and add it to the aggregator (messages
///    without identity stop here)
///
/// # Arguments
/// * `rx` - Receiver from `IngestHandle::channel`
/// * `aggregator` - Shared window aggregator
/// * `rules` - Rule engine
/// * `events_sink` - Bus receiving rule events
/// * `events_topic` - Topic for rule events
/// * `stats` - Counters shared with the producer handle
pub async fn start_ingestion(
    mut rx: mpsc::Receiver<TelemetryMessage>,
    aggregator: Arc<WindowAggregator>,
    rules: Arc<RuleEngine>,
    events_sink: Arc<dyn MessageSink>,
    events_topic: String,
    stats: Arc<IngestStats>,
) {
    log::info!("🚀 Starting telemetry ingestion");
    log::info!("   ├─ Event topic: {} ({})", events_topic, events_sink.backend_type());
    log::info!("   └─ Waiting for telemetry...");

    while let Some(msg) = rx.recv().await {
        let events = rules.evaluate(&msg);
        stats
            .events_detected
            .fetch_add(events.len() as u64, Ordering::Relaxed);

        for event in events {
            let payload = match serde_json::to_vec(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    log::error!("❌ Failed to encode {} event: {}", event.event_type.as_str(), e);
                    stats.event_publish_failures.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            match events_sink.publish(&events_topic, payload).await {
                Ok(()) => {
                    stats.events_published.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "Published event: {} for driver {}",
                        event.event_type.as_str(),
                        event.driver
                    );
                }
                Err(e) => {
                    stats.event_publish_failures.fetch_add(1, Ordering::Relaxed);
                    log::error!("❌ Failed to publish event: {}", e);
                }
            }
        }

        match msg.to_sample() {
            Some(sample) => {
                if aggregator.add(sample) != AddOutcome::Shed {
                    stats.samples_aggregated.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                stats.without_identity.fetch_add(1, Ordering::Relaxed);
            }
        }

        let processed = stats.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % STATS_LOG_EVERY == 0 {
            let snapshot = stats.snapshot();
            log::info!(
                "📊 Processed {} messages, detected {} events | open laps: {} | dropped: {} malformed, {} overflow",
                snapshot.processed,
                snapshot.events_detected,
                aggregator.open_windows(),
                snapshot.malformed,
                snapshot.overflow_dropped
            );
        }
    }

    log::info!("✅ Telemetry ingestion stopped");
}
