//! Domain models - sensor messages and outbound actions
//!
//! This module contains the canonical data types used throughout the system:
//! - `SensorMessage` - typed camera messages (state / event)
//! - `EventName` - closed set of camera event names
//! - `ActionRequest` - a single outbound actuator command
//! - Typed payload views for video/audio playback commands

pub mod action;
pub mod message;

pub use action::{ActionKind, ActionRequest, Priority};
pub use message::{EventMessage, EventName, SensorMessage, StateMessage};
