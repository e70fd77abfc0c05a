//! Action model for outbound media commands
//!
//! Actions are created by rule evaluation (or synthesized by the pipeline on
//! occupancy transitions) and consumed exactly once by the dispatcher. The
//! payload stays an opaque JSON object until execution time, when the
//! dispatcher decodes the typed view for the action kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// What kind of actuator call an action performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    VideoPlay,
    AudioPlay,
    Custom,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::VideoPlay => "VIDEO_PLAY",
            ActionKind::AudioPlay => "AUDIO_PLAY",
            ActionKind::Custom => "CUSTOM",
        }
    }
}

/// Queue priority. HIGH actions jump the queue (front-insert); LOW and
/// NORMAL drain in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// A single outbound command, consumed exactly once by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    /// UUIDv7, assigned at creation
    #[serde(default = "new_uuid_v7")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    /// Opaque key-value payload, decoded per kind at execution time
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
}

impl ActionRequest {
    pub fn new(kind: ActionKind, payload: Value, priority: Priority) -> Self {
        Self { id: new_uuid_v7(), kind, payload, priority }
    }
}

fn default_volume() -> f64 {
    1.0
}

/// Typed view of a VIDEO_PLAY payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoPlayCommand {
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(rename = "loop", default)]
    pub looped: bool,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

/// Typed view of an AUDIO_PLAY payload. Either a prerecorded clip id or a
/// text-to-speech string; players decide what to do when both are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPlayCommand {
    #[serde(rename = "audioId", default, skip_serializing_if = "Option::is_none")]
    pub audio_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: f64,
}
