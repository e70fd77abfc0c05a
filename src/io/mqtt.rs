//! MQTT client for receiving camera sensor data

use crate::domain::message::SensorMessage;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Extract the sensor id from a `sensor/<id>/state` or `sensor/<id>/event`
/// topic. Returns `None` for topics with a different shape.
pub fn sensor_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    let prefix = parts.next()?;
    let id = parts.next()?;
    let kind = parts.next()?;
    if prefix != "sensor" || parts.next().is_some() {
        return None;
    }
    if (kind == "state" || kind == "event") && !id.is_empty() {
        Some(id)
    } else {
        None
    }
}

/// Start the MQTT client and send parsed sensor messages to the channel
///
/// Messages are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped messages are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    msg_tx: mpsc::Sender<SensorMessage>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("roomcast-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_state_topic(), QoS::AtMostOnce).await?;
    client.subscribe(config.mqtt_event_topic(), QoS::AtMostOnce).await?;

    info!(
        state_topic = %config.mqtt_state_topic(),
        event_topic = %config.mqtt_event_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "MQTT client subscribed"
    );

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let topic = publish.topic.clone();
                        let Some(msg) = parse_payload(&topic, &publish.payload, &metrics) else {
                            continue;
                        };

                        // The topic segment is authoritative for routing; a
                        // mismatching body id is suspicious but not fatal.
                        if let Some(topic_id) = sensor_id_from_topic(&topic) {
                            if topic_id != msg.camera_id() {
                                warn!(
                                    topic_id = %topic_id,
                                    camera_id = %msg.camera_id(),
                                    "sensor_id_mismatch"
                                );
                            }
                        }

                        metrics.record_message_received();
                        if let Err(e) = msg_tx.try_send(msg) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_message_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("sensor_message_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("Pipeline channel closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "MQTT error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Parse one publish payload into a sensor message. Malformed payloads are
/// logged and dropped.
fn parse_payload(topic: &str, payload: &[u8], metrics: &Metrics) -> Option<SensorMessage> {
    let json_str = match std::str::from_utf8(payload) {
        Ok(s) => s,
        Err(e) => {
            metrics.record_message_malformed();
            warn!(topic = %topic, error = %e, "Invalid UTF-8 in MQTT payload");
            return None;
        }
    };

    match serde_json::from_str::<SensorMessage>(json_str) {
        Ok(msg) => {
            debug!(topic = %topic, camera_id = %msg.camera_id(), "sensor_message_parsed");
            Some(msg)
        }
        Err(e) => {
            metrics.record_message_malformed();
            warn!(topic = %topic, error = %e, "Failed to parse sensor message");
            None
        }
    }
}
