//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to hand events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::action::{epoch_ms, ActionRequest};
use crate::services::counter::{CountChange, SensorCount};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// CUSTOM action payload for external subscribers
    Custom(CustomActionPayload),
    /// Official occupancy count change
    Occupancy(OccupancyPayload),
    /// Dispatch outcome (completed or failed)
    Outcome(OutcomePayload),
}

/// Payload for CUSTOM actions
#[derive(Debug, Clone, Serialize)]
pub struct CustomActionPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Originating action id
    pub action_id: String,
    /// The action's payload object, forwarded as-is
    pub payload: Value,
}

/// Payload for occupancy changes
#[derive(Debug, Clone, Serialize)]
pub struct OccupancyPayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp of the reading that caused the change (epoch ms)
    pub ts: u64,
    pub previous: i64,
    pub current: i64,
    /// Per-sensor counts at the moment of the change
    pub sensors: Vec<SensorCount>,
}

/// Payload for dispatch outcomes
#[derive(Debug, Clone, Serialize)]
pub struct OutcomePayload {
    /// Site identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub action_id: String,
    /// Action kind (VIDEO_PLAY, AUDIO_PLAY, CUSTOM)
    pub kind: String,
    /// "completed" or "failed"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    /// Create a new sender from an mpsc sender
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Publish a CUSTOM action's payload for external subscribers
    pub fn send_custom(&self, action: &ActionRequest) {
        let payload = CustomActionPayload {
            site: Some(self.site_id.clone()),
            ts: epoch_ms(),
            action_id: action.id.clone(),
            payload: action.payload.clone(),
        };
        // Use try_send to avoid blocking - drop if channel full
        let _ = self.tx.try_send(EgressMessage::Custom(payload));
    }

    /// Publish an official-count change
    pub fn send_occupancy(&self, change: &CountChange) {
        let payload = OccupancyPayload {
            site: Some(self.site_id.clone()),
            ts: change.timestamp,
            previous: change.previous,
            current: change.current,
            sensors: change.sensors.clone(),
        };
        let _ = self.tx.try_send(EgressMessage::Occupancy(payload));
    }

    /// Publish a dispatch outcome
    pub fn send_outcome(&self, action: &ActionRequest, error: Option<&str>) {
        let payload = OutcomePayload {
            site: Some(self.site_id.clone()),
            ts: epoch_ms(),
            action_id: action.id.clone(),
            kind: action.kind.as_str().to_string(),
            status: if error.is_none() { "completed" } else { "failed" }.to_string(),
            error: error.map(str::to_string),
        };
        let _ = self.tx.try_send(EgressMessage::Outcome(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued.
/// site_id is injected into every payload for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
