//! MQTT plumbing: the broker connection, the inbound reading subscription
//! and the outbound command dispatcher.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::control::ActuatorCommand;
use crate::gateway::{GatewayService, Ingest};

/// Outbound actuator command sink, at-least-once semantics. Duplicates are
/// possible and must be tolerated by the device firmware; the sink itself
/// never deduplicates.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn publish(&self, device_id: &str, command: ActuatorCommand) -> Result<()>;
}

/// Wire envelope published to `{prefix}/{device_id}`.
#[derive(Debug, Serialize)]
struct CommandEnvelope<'a> {
    command: &'a str,
    /// Unix epoch seconds, fractional
    timestamp: f64,
}

pub fn connect(config: &Config) -> (AsyncClient, EventLoop) {
    let client_id = format!("iot-gateway-{}", Uuid::new_v4());
    let mut options = MqttOptions::new(client_id, &config.mqtt_host, config.mqtt_port);
    options.set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs));
    AsyncClient::new(options, 64)
}

pub struct MqttCommandDispatcher {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttCommandDispatcher {
    pub fn new(client: AsyncClient, topic_prefix: String) -> Self {
        Self {
            client,
            topic_prefix,
        }
    }

    fn command_topic(&self, device_id: &str) -> String {
        format!("{}/{}", self.topic_prefix, device_id)
    }
}

#[async_trait]
impl CommandSink for MqttCommandDispatcher {
    async fn publish(&self, device_id: &str, command: ActuatorCommand) -> Result<()> {
        let topic = self.command_topic(device_id);
        let payload = serde_json::to_vec(&CommandEnvelope {
            command: command.as_str(),
            timestamp: unix_epoch_secs(),
        })
        .context("failed to serialize command envelope")?;

        // QoS 1: redelivered until acknowledged.
        self.client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
            .with_context(|| format!("failed to publish command to {topic}"))?;

        info!(device_id = %device_id, command = command.as_str(), topic = %topic, "Command published");
        Ok(())
    }
}

fn unix_epoch_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Poll the MQTT event loop forever, feeding inbound readings into the
/// gateway. Intended to be `tokio::spawn`-ed from main.
///
/// Messages are handled inline, one at a time, so delivery for the data
/// subscription is serial and the anomaly baseline needs no per-key locks.
pub async fn run_ingest_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    gateway: Arc<GatewayService>,
    data_topic: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // (Re)subscribe on every successful connection, including
                // reconnects after a broker outage.
                info!(topic = %data_topic, "Connected to MQTT broker, subscribing");
                if let Err(e) = client.subscribe(&data_topic, QoS::AtMostOnce).await {
                    error!(error = %e, topic = %data_topic, "Failed to subscribe to data topic");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match gateway.handle_payload(&publish.payload).await {
                    Ok(Ingest::Committed(snapshot)) => {
                        info!(
                            device_id = %snapshot.device_id,
                            snapshot_id = snapshot.id,
                            fan_on = snapshot.fan_on,
                            light_on = snapshot.light_on,
                            "Reading committed"
                        );
                    }
                    Ok(Ingest::Rejected) => {}
                    Err(e) => {
                        warn!(topic = %publish.topic, error = %e, "Dropped inbound message");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "MQTT event loop error, retrying");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_topic_is_per_device() {
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("test", "127.0.0.1", 1883), 10);
        let dispatcher = MqttCommandDispatcher::new(client, "stm32/command".into());
        assert_eq!(dispatcher.command_topic("dev1"), "stm32/command/dev1");
    }

    #[test]
    fn command_envelope_shape() {
        let payload = serde_json::to_value(CommandEnvelope {
            command: ActuatorCommand::OpenFan.as_str(),
            timestamp: unix_epoch_secs(),
        })
        .expect("serializable");

        assert_eq!(payload["command"], "open_fan");
        assert!(payload["timestamp"].is_f64());
        assert!(payload["timestamp"].as_f64().unwrap() > 1_700_000_000.0);
    }
}
