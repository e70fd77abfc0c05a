//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for receiving camera sensor data
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `players` - HTTP clients for the video/audio player services
//! - `http` - Management API and Prometheus metrics endpoint

pub mod egress_channel;
pub mod http;
pub mod mqtt;
pub mod mqtt_egress;
pub mod players;

// Re-export commonly used types
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use mqtt_egress::MqttPublisher;
pub use players::HttpPlayers;
