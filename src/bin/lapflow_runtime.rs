//! Lapflow Runtime - lap analytics service
//!
//! This binary runs the analytics pipeline:
//! - Connects to the MQTT broker (telemetry in, rule events out)
//! - Connects to NATS (enriched predictions out)
//! - Spawns ingestion, lap scan and predictor health tasks
//! - Shuts down cleanly on CTRL+C
//!
//! Usage:
//!   cargo run --release --bin lapflow_runtime
//!
//! Environment variables (see `PipelineConfig::from_env` for the full list):
//!   MQTT_HOST / MQTT_PORT - Broker address (default: mqtt:1883)
//!   NATS_URL - NATS server (default: nats://nats:4222)
//!   MLAAS_URL - Predictor service (default: http://mlaas:8000)
//!   LAP_COMPLETION_THRESHOLD - Seconds of silence closing a lap (default: 10)

use dotenv::dotenv;
use lapflow::bus::{mqtt::qos_from_level, MqttBus, MqttSettings, NatsSink};
use lapflow::pipeline::{
    config::PipelineConfig,
    predictor::HttpPredictorTransport,
    service::{AnalyticsService, ServiceComponents},
    shutdown::Shutdown,
};
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Lapflow Runtime - lap analytics service");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = PipelineConfig::from_env();
    config.validate()?;

    info!("✅ Configuration loaded");
    info!("   ├─ MQTT: {}:{} (qos {})", config.mqtt_host, config.mqtt_port, config.mqtt_qos);
    info!("   ├─ Telemetry topic: {}", config.mqtt_topic_raw);
    info!("   ├─ Events topic: {}", config.mqtt_topic_events);
    info!("   ├─ NATS: {} → {}", config.nats_url, config.nats_topic);
    info!("   ├─ Predictor: {}", config.mlaas_url);
    info!(
        "   ├─ Lap completion: {}s inactivity, > {} samples",
        config.lap_completion_threshold_secs, config.min_lap_samples
    );
    info!(
        "   ├─ Rules: speed > {}, rpm > {}, brake above {}",
        config.rule_speed_max, config.rule_rpm_max, config.rule_brake_alert_speed
    );
    info!(
        "   ├─ Intervals: scan {}ms, health {}ms, predict timeout {}ms",
        config.scan_interval_ms, config.health_check_interval_ms, config.predict_timeout_ms
    );
    info!(
        "   └─ Limits: ingest buffer {}, open laps {}, history {}",
        config.ingest_channel_buffer,
        config.max_open_windows,
        config.history_max_records
    );

    // Connect buses (fatal on failure)
    let mut mqtt_settings = MqttSettings::new(
        config.mqtt_host.clone(),
        config.mqtt_port,
        config.mqtt_client_id.clone(),
    );
    mqtt_settings.qos = qos_from_level(config.mqtt_qos)?;
    mqtt_settings.connect_timeout = config.connect_timeout();

    let (mqtt, eventloop) = MqttBus::connect(&mqtt_settings).await?;
    let nats = Arc::new(NatsSink::connect(&config.nats_url, config.connect_timeout()).await?);

    let transport = Arc::new(HttpPredictorTransport::new(
        &config.mlaas_url,
        config.predict_timeout(),
    )?);

    // Spawn pipeline tasks
    info!("🚀 Spawning background tasks...");
    let (service, ingest) = AnalyticsService::spawn(
        &config,
        ServiceComponents {
            predictions_sink: nats.clone(),
            events_sink: Arc::new(mqtt.clone()),
            transport,
            aggregator: None,
        },
    );

    let listener_shutdown = service.shutdown_signal();
    let ingest_drained = Shutdown::new();
    let listener_drained = ingest_drained.clone();
    let topic = config.mqtt_topic_raw.clone();
    let listener = tokio::spawn(async move {
        mqtt.run_listener(eventloop, topic, ingest, listener_shutdown, listener_drained)
            .await;
    });

    info!("✅ All background tasks running");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    // Wait for CTRL+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    // The listener stops reading and drops the ingest handle, but keeps the
    // MQTT connection polled until the consumer has published its last events
    service.shutdown().await;

    ingest_drained.trigger();
    if let Err(e) = listener.await {
        error!("❌ MQTT listener task failed: {}", e);
    }

    if let Err(e) = nats.flush().await {
        error!("❌ Failed to flush NATS: {}", e);
    }

    info!("✅ Lapflow runtime stopped");
    Ok(())
}
