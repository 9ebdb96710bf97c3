//! Analytics service - wires the pipeline components and owns their tasks
//!
//! `AnalyticsService::spawn` starts three background tasks:
//! 1. Ingestion consumer (rules + aggregator)
//! 2. Lap scan loop (drain, predict, publish)
//! 3. Predictor health monitor
//!
//! The returned `IngestHandle` is the only way telemetry enters the
//! pipeline; the ingestion task ends once every clone of it is dropped.

use super::aggregator::WindowAggregator;
use super::config::PipelineConfig;
use super::health::{HealthGate, HealthMonitor};
use super::history::PredictionHistory;
use super::ingestion::{start_ingestion, IngestHandle, IngestStats};
use super::predictor::{PredictorClient, PredictorTransport};
use super::publisher::ResultPublisher;
use super::rules::{RuleEngine, RuleLimits};
use super::scheduler::{health_monitor_task, scan_loop_task, ScanSettings};
use super::shutdown::Shutdown;
use crate::bus::MessageSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long shutdown waits for the ingestion consumer to drain
const INGEST_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// External collaborators injected into the service
pub struct ServiceComponents {
    /// Receives enriched predictions
    pub predictions_sink: Arc<dyn MessageSink>,

    /// Receives rule events
    pub events_sink: Arc<dyn MessageSink>,

    /// Predictor service transport (HTTP in production)
    pub transport: Arc<dyn PredictorTransport>,

    /// Pre-built aggregator (e.g. with a test clock); built from config if `None`
    pub aggregator: Option<Arc<WindowAggregator>>,
}

pub struct AnalyticsService {
    aggregator: Arc<WindowAggregator>,
    history: Arc<PredictionHistory>,
    gate: HealthGate,
    ingest_stats: Arc<IngestStats>,
    shutdown: Shutdown,
    ingestion: JoinHandle<()>,
    loops: Vec<JoinHandle<()>>,
}

impl AnalyticsService {
    /// Build the pipeline and spawn its background tasks
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    /// * `config` - Validated pipeline configuration
    /// * `components` - Bus sinks and predictor transport
    ///
    /// # Returns
    /// The running service and the producer handle for raw telemetry
    pub fn spawn(config: &PipelineConfig, components: ServiceComponents) -> (Self, IngestHandle) {
        let aggregator = components
            .aggregator
            .unwrap_or_else(|| Arc::new(WindowAggregator::new(config.max_open_windows)));

        let rules = Arc::new(RuleEngine::new(RuleLimits {
            speed_max: config.rule_speed_max,
            rpm_max: config.rule_rpm_max,
            brake_alert_speed: config.rule_brake_alert_speed,
        }));

        let history = Arc::new(PredictionHistory::new(
            config.recent_predictions_capacity,
            config.history_max_records,
        ));

        let gate = HealthGate::new();
        let monitor = Arc::new(HealthMonitor::new(components.transport.clone(), gate.clone()));
        let predictor = Arc::new(PredictorClient::new(components.transport, gate.clone()));
        let publisher = Arc::new(ResultPublisher::new(
            components.predictions_sink,
            config.nats_topic.clone(),
            history.clone(),
        ));

        let shutdown = Shutdown::new();
        let (ingest, rx) = IngestHandle::channel(config.ingest_channel_buffer);
        let ingest_stats = ingest.stats();

        let ingestion = tokio::spawn(start_ingestion(
            rx,
            aggregator.clone(),
            rules,
            components.events_sink,
            config.mqtt_topic_events.clone(),
            ingest_stats.clone(),
        ));

        let settings = ScanSettings {
            interval: config.scan_interval(),
            inactivity_threshold: config.lap_completion_threshold(),
            min_samples: config.min_lap_samples,
        };

        let loops = vec![
            tokio::spawn(scan_loop_task(
                aggregator.clone(),
                predictor,
                publisher,
                settings,
                shutdown.clone(),
            )),
            tokio::spawn(health_monitor_task(
                monitor,
                config.health_check_interval(),
                shutdown.clone(),
            )),
        ];

        let service = Self {
            aggregator,
            history,
            gate,
            ingest_stats,
            shutdown,
            ingestion,
            loops,
        };

        (service, ingest)
    }

    pub fn aggregator(&self) -> &Arc<WindowAggregator> {
        &self.aggregator
    }

    pub fn history(&self) -> &Arc<PredictionHistory> {
        &self.history
    }

    pub fn gate(&self) -> &HealthGate {
        &self.gate
    }

    pub fn ingest_stats(&self) -> &Arc<IngestStats> {
        &self.ingest_stats
    }

    /// Shared shutdown flag (also stops bus listeners given a clone)
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Stop the loops and wait for in-flight work
    ///
    /// Drop every `IngestHandle` first so the ingestion consumer can drain.
    /// A consumer still running after the grace period is aborted.
    pub async fn shutdown(self) {
        self.shutdown.trigger();

        for task in self.loops {
            if let Err(e) = task.await {
                log::error!("❌ Background task failed: {}", e);
            }
        }

        let mut ingestion = self.ingestion;
        match tokio::time::timeout(INGEST_DRAIN_TIMEOUT, &mut ingestion).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("❌ Ingestion task failed: {}", e),
            Err(_) => {
                ingestion.abort();
                log::warn!(
                    "⚠️  Ingestion did not drain within {:?}, aborted with messages still queued",
                    INGEST_DRAIN_TIMEOUT
                );
            }
        }

        let stats = self.ingest_stats.snapshot();
        let aggregator = self.aggregator.stats();
        log::info!("📊 Final stats:");
        log::info!("   ├─ Messages processed: {}", stats.processed);
        log::info!("   ├─ Events published: {}", stats.events_published);
        log::info!("   ├─ Laps summarized: {}", aggregator.summaries_emitted);
        log::info!("   ├─ Predictions published: {}", self.history.len());
        log::info!("   └─ Laps still open: {}", aggregator.open_windows);
    }
}
