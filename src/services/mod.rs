//! Services - business logic and state management
//!
//! This module contains the core processing components:
//! - `counter` - Occupancy fusion across camera sensors
//! - `rules` - Event rule registry and state history
//! - `dispatcher` - Priority action queue and drain worker
//! - `pipeline` - Message fan-out and transition synthesis

pub mod counter;
pub mod dispatcher;
pub mod pipeline;
pub mod rules;

// Re-export commonly used types
pub use counter::OccupancyCounter;
pub use dispatcher::{ActionDispatcher, DispatchOutcome, MediaPlayer};
pub use pipeline::Pipeline;
pub use rules::RuleBook;
