//! MQTT publisher for egress events
//!
//! Publishes controller events to MQTT topics for downstream consumers:
//! - roomcast/custom - CUSTOM action payloads (QoS 1)
//! - roomcast/occupancy - Official count changes (QoS 0)
//! - roomcast/outcomes - Dispatch outcomes (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    custom_topic: String,
    occupancy_topic: String,
    outcomes_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("roomcast-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        // Set credentials if configured
        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        // QoS 1 acknowledgement received
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            custom_topic: config.mqtt_egress_custom_topic().to_string(),
            occupancy_topic: config.mqtt_egress_occupancy_topic().to_string(),
            outcomes_topic: config.mqtt_egress_outcomes_topic().to_string(),
        }
    }

    /// Run the publisher loop
    ///
    /// Processes messages from the channel and publishes to MQTT.
    /// Runs until shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            custom = %self.custom_topic,
            occupancy = %self.occupancy_topic,
            outcomes = %self.outcomes_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        // Drain remaining messages
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            // QoS 1 for custom actions: external actuators depend on them
            EgressMessage::Custom(payload) => {
                self.publish(&self.custom_topic, QoS::AtLeastOnce, &payload).await;
            }
            // QoS 0 for telemetry (fire-and-forget)
            EgressMessage::Occupancy(payload) => {
                self.publish(&self.occupancy_topic, QoS::AtMostOnce, &payload).await;
            }
            EgressMessage::Outcome(payload) => {
                self.publish(&self.outcomes_topic, QoS::AtMostOnce, &payload).await;
            }
        }
    }

    async fn publish<T: Serialize>(&self, topic: &str, qos: QoS, payload: &T) {
        let Ok(json) = serde_json::to_string(payload) else {
            return;
        };
        if let Err(e) = self.client.publish(topic, qos, false, json.as_bytes()).await {
            if qos == QoS::AtLeastOnce {
                error!(topic = %topic, error = %e, "mqtt_egress_publish_failed");
            } else {
                debug!(topic = %topic, error = %e, "mqtt_egress_publish_failed");
            }
        }
    }
}
