//! MQTT adapter (rumqttc)
//!
//! One connection serves both directions: the listener task polls the event
//! loop and forwards raw telemetry into the ingest channel, while `MqttBus`
//! publishes rule events through the same client.

use super::backoff::ReconnectBackoff;
use super::{BusError, MessageSink};
use crate::pipeline::ingestion::IngestHandle;
use crate::pipeline::shutdown::Shutdown;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;

/// Outstanding client requests buffered before publishes start failing
const REQUEST_CHANNEL_CAPACITY: usize = 1000;

/// Upper bound on flushing DISCONNECT at shutdown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub qos: QoS,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            qos: QoS::AtLeastOnce,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Broker address for logging
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Map a numeric QoS level (0-2) onto rumqttc's enum
pub fn qos_from_level(level: u8) -> Result<QoS, BusError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BusError::InvalidSetting(format!(
            "MQTT QoS must be 0, 1 or 2 (got {})",
            other
        ))),
    }
}

#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
}

impl MqttBus {
    /// Connect to the broker and wait for the first ConnAck
    ///
    /// Failing to reach the broker here is fatal to startup; later
    /// disconnects are retried by `run_listener`.
    ///
    /// # Returns
    /// The bus handle plus the event loop the listener must poll
    pub async fn connect(settings: &MqttSettings) -> Result<(Self, EventLoop), BusError> {
        let mut options = MqttOptions::new(
            settings.client_id.clone(),
            settings.host.clone(),
            settings.port,
        );
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        log::info!("🔌 Connecting to MQTT broker at {}", settings.address());

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => continue,
                    Err(e) => return Err(BusError::MqttConnection(e)),
                }
            }
        };

        match tokio::time::timeout(settings.connect_timeout, handshake).await {
            Ok(Ok(())) => {
                log::info!("✅ Connected to MQTT broker at {}", settings.address());
                Ok((
                    Self {
                        client,
                        qos: settings.qos,
                    },
                    eventloop,
                ))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BusError::ConnectTimeout(settings.address())),
        }
    }

    /// Poll the connection until ingestion has drained, forwarding telemetry
    ///
    /// Runs in three phases:
    /// 1. Reading - subscribed, publish payloads go to `ingest`
    /// 2. Draining - after `shutdown`: unsubscribed and `ingest` dropped so
    ///    the consumer can finish, but the event loop is still polled so
    ///    rule events raised by the tail of the queue reach the broker
    /// 3. Disconnecting - after `drained`: DISCONNECT is sent and flushed
    ///
    /// Connection errors are logged and retried with exponential backoff.
    ///
    /// # Arguments
    /// * `eventloop` - Event loop returned by `connect`
    /// * `topic` - Raw telemetry topic
    /// * `ingest` - Producer handle for the ingest channel
    /// * `shutdown` - Stops reading inbound telemetry
    /// * `drained` - Signals that the ingestion consumer has finished
    pub async fn run_listener(
        &self,
        mut eventloop: EventLoop,
        topic: String,
        ingest: IngestHandle,
        shutdown: Shutdown,
        drained: Shutdown,
    ) {
        let mut backoff = ReconnectBackoff::default();
        let mut ingest = Some(ingest);

        self.subscribe(&topic);
        log::info!("📡 Listening for telemetry on {}", topic);

        loop {
            if ingest.is_some() && !shutdown.is_running() {
                if let Err(e) = self.client.try_unsubscribe(topic.as_str()) {
                    log::debug!("MQTT unsubscribe request failed: {}", e);
                }
                // Last producer handle: the ingest channel closes once the queue empties
                ingest = None;
                log::info!("📴 Stopped reading {}, flushing outbound events", topic);
            }
            if !drained.is_running() {
                break;
            }

            let reading = ingest.is_some();
            let polled = tokio::select! {
                polled = eventloop.poll() => polled,
                _ = phase_end(reading, &shutdown, &drained) => continue,
            };

            match polled {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(ingest) = &ingest {
                        ingest.offer(&publish.payload);
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if backoff.attempts() > 0 {
                        log::info!("✅ Reconnected to MQTT broker");
                    }
                    backoff.reset();
                    if reading {
                        self.subscribe(&topic);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("❌ MQTT connection error: {}", e);
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = phase_end(reading, &shutdown, &drained) => {}
                    }
                }
            }
        }

        self.disconnect(&mut eventloop).await;
        log::info!("✅ MQTT listener stopped");
    }

    fn subscribe(&self, topic: &str) {
        if let Err(e) = self.client.try_subscribe(topic, self.qos) {
            log::error!("❌ Failed to subscribe to {}: {}", topic, e);
        }
    }

    /// Queue DISCONNECT and poll until it has been written
    async fn disconnect(&self, eventloop: &mut EventLoop) {
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect request failed: {}", e);
            return;
        }

        let flush = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                    Ok(_) => continue,
                    Err(e) => {
                        log::debug!("MQTT connection closed before DISCONNECT: {}", e);
                        return false;
                    }
                }
            }
        };

        match tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await {
            Ok(true) => log::info!("🔌 Disconnected from MQTT broker"),
            Ok(false) => {}
            Err(_) => log::warn!("⚠️  MQTT DISCONNECT not flushed within {:?}", DISCONNECT_TIMEOUT),
        }
    }
}

/// Resolves when the listener's current phase should end
async fn phase_end(reading: bool, shutdown: &Shutdown, drained: &Shutdown) {
    if reading {
        shutdown.wait().await
    } else {
        drained.wait().await
    }
}

#[async_trait]
impl MessageSink for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        // Non-blocking: once the listener has disconnected, publishes fail fast
        self.client.try_publish(topic, self.qos, false, payload)?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "mqtt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(qos_from_level(3), Err(BusError::InvalidSetting(_))));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = MqttSettings::new("mqtt", 1883, "analytics-service");
        assert_eq!(settings.address(), "mqtt:1883");
        assert_eq!(settings.qos, QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_events_still_publish_while_ingest_drains() {
        // Unreachable broker: requests queue in the client channel as long as
        // the listener keeps the event loop alive
        let options = MqttOptions::new("lapflow-drain-test", "127.0.0.1", 9);
        let (client, eventloop) = AsyncClient::new(options, 16);
        let bus = MqttBus {
            client,
            qos: QoS::AtMostOnce,
        };

        let (ingest, mut rx) = IngestHandle::channel(8);
        let shutdown = Shutdown::new();
        let drained = Shutdown::new();

        let listener = {
            let bus = bus.clone();
            let shutdown = shutdown.clone();
            let drained = drained.clone();
            tokio::spawn(async move {
                bus.run_listener(eventloop, "telemetry/raw".to_string(), ingest, shutdown, drained)
                    .await;
            })
        };

        shutdown.trigger();

        // The listener releases its ingest handle, closing the channel
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("ingest channel should close");
        assert!(closed.is_none());

        // Draining: tail events are still accepted
        assert!(bus
            .publish("telemetry/events", br#"{"type":"SPEED_OVER_LIMIT"}"#.to_vec())
            .await
            .is_ok());

        drained.trigger();
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .expect("listener should stop after drain")
            .unwrap();

        // Event loop is gone once the listener has disconnected
        assert!(bus.publish("telemetry/events", b"{}".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let mut settings = MqttSettings::new("127.0.0.1", 9, "lapflow-test");
        settings.connect_timeout = Duration::from_secs(2);

        let result = MqttBus::connect(&settings).await;
        assert!(result.is_err());
    }
}
