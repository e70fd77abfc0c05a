//! Wire types for camera sensor messages
//!
//! Sensors publish two message shapes on their per-camera topics, tagged by
//! the `type` field: periodic occupancy state and discrete events. Parsing
//! happens at the MQTT boundary; everything downstream works with these
//! typed messages.

use serde::{Deserialize, Serialize};

/// A message received from a camera sensor, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SensorMessage {
    Event(EventMessage),
    State(StateMessage),
}

impl SensorMessage {
    /// Camera id carried inside the message body
    pub fn camera_id(&self) -> &str {
        match self {
            SensorMessage::Event(e) => &e.camera_id,
            SensorMessage::State(s) => &s.camera_id,
        }
    }
}

/// Discrete event reported by a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub camera_id: String,
    /// Epoch milliseconds (sensor clock)
    pub timestamp: u64,
    pub event: CameraEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraEvent {
    pub name: EventName,
    /// Optional ad-hoc command the sensor asks the system to forward
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_request: Option<String>,
}

/// Closed set of camera event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    PersonEntered,
    SittingConfirmed,
    PersonStoodUp,
    AllPeopleLeft,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::PersonEntered => "PERSON_ENTERED",
            EventName::SittingConfirmed => "SITTING_CONFIRMED",
            EventName::PersonStoodUp => "PERSON_STOOD_UP",
            EventName::AllPeopleLeft => "ALL_PEOPLE_LEFT",
        }
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERSON_ENTERED" => Ok(EventName::PersonEntered),
            "SITTING_CONFIRMED" => Ok(EventName::SittingConfirmed),
            "PERSON_STOOD_UP" => Ok(EventName::PersonStoodUp),
            "ALL_PEOPLE_LEFT" => Ok(EventName::AllPeopleLeft),
            other => anyhow::bail!("unknown event name: {other}"),
        }
    }
}

/// Periodic occupancy state reported by a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMessage {
    pub camera_id: String,
    /// Epoch milliseconds (sensor clock)
    pub timestamp: u64,
    pub data: StateData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateData {
    /// Observed person count. Accepted as-is; sensors are trusted to send
    /// non-negative values and fusion does not validate them.
    pub person_count: i64,
    #[serde(default)]
    pub people: Vec<Person>,
}

/// Per-person detail record (carried for diagnostics, unused by fusion)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub posture: Posture,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Posture {
    Sitting,
    Standing,
    Walking,
    Unknown,
}
