//! Result publisher - enriched predictions out to the bus and into history

use super::history::PredictionHistory;
use super::types::{EnrichedRecord, PredictionResult, Summary};
use crate::bus::MessageSink;
use chrono::Utc;
use std::sync::Arc;

pub struct ResultPublisher {
    sink: Arc<dyn MessageSink>,
    topic: String,
    history: Arc<PredictionHistory>,
}

impl ResultPublisher {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        topic: impl Into<String>,
        history: Arc<PredictionHistory>,
    ) -> Self {
        Self {
            sink,
            topic: topic.into(),
            history,
        }
    }

    pub fn history(&self) -> &Arc<PredictionHistory> {
        &self.history
    }

    /// Publish one enriched record and record it in history
    ///
    /// The record is published once; a failed publish is logged and the
    /// record is not added to history.
    ///
    /// # Returns
    /// Whether the record was published
    pub async fn publish(&self, summary: &Summary, prediction: &PredictionResult) -> bool {
        let record = EnrichedRecord::from_parts(summary, prediction, Utc::now());

        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!(
                    "❌ Failed to encode prediction for {} lap {}: {}",
                    record.driver,
                    record.lap_number,
                    e
                );
                return false;
            }
        };

        if let Err(e) = self.sink.publish(&self.topic, payload).await {
            log::error!(
                "❌ Failed to publish prediction for {} lap {} to {}: {}",
                record.driver,
                record.lap_number,
                self.sink.backend_type(),
                e
            );
            return false;
        }

        log::info!(
            "🏁 Published prediction for {} lap {}: {:.3}s",
            record.driver,
            record.lap_number,
            record.predicted_lap_time
        );
        self.history.record(record);

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, MemoryBus};
    use crate::pipeline::types::ConfidenceInterval;
    use async_trait::async_trait;

    fn make_summary(lap_number: i64) -> Summary {
        Summary {
            driver: "NOR".to_string(),
            lap_number,
            speed: Some(201.5),
            throttle: Some(64.0),
            rpm: Some(10_250.0),
            x: None,
            y: None,
            brake: true,
            drs: false,
            n_gear: Some(6),
            sample_count: 42,
            timestamp: Utc::now(),
        }
    }

    fn make_prediction() -> PredictionResult {
        PredictionResult {
            predicted_lap_time: 88.125,
            confidence_interval: ConfidenceInterval {
                lower: 87.0,
                upper: 89.25,
            },
            model_version: "1.4.0".to_string(),
        }
    }

    struct FailingSink;

    #[async_trait]
    impl MessageSink for FailingSink {
        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), BusError> {
            Err(BusError::Nats("connection closed".to_string()))
        }

        fn backend_type(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_publish_emits_record_and_records_history() {
        let bus = Arc::new(MemoryBus::default());
        let history = Arc::new(PredictionHistory::default());
        let publisher = ResultPublisher::new(bus.clone(), "telemetry.predictions", history.clone());

        assert!(publisher.publish(&make_summary(7), &make_prediction()).await);

        let published: Vec<serde_json::Value> = bus.published_json("telemetry.predictions");
        assert_eq!(published.len(), 1);

        let record = &published[0];
        assert_eq!(record["driver"], "NOR");
        assert_eq!(record["lap_number"], 7);
        assert_eq!(record["predicted_lap_time"], 88.125);
        assert_eq!(record["confidence_interval"]["upper"], 89.25);
        assert_eq!(record["actual_telemetry"]["avg_throttle"], 0.64);
        assert_eq!(record["actual_telemetry"]["used_brake"], true);
        assert_eq!(record["model_version"], "1.4.0");
        assert!(record["timestamp"].is_string());

        assert_eq!(history.len(), 1);
        assert_eq!(history.recent()[0].lap_number, 7);
    }

    #[tokio::test]
    async fn test_failed_publish_is_not_recorded() {
        let history = Arc::new(PredictionHistory::default());
        let publisher =
            ResultPublisher::new(Arc::new(FailingSink), "telemetry.predictions", history.clone());

        assert!(!publisher.publish(&make_summary(3), &make_prediction()).await);
        assert!(history.is_empty());
    }
}
