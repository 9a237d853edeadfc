//! Event system for agentflow
//!
//! Sessions, the tool pipeline and the action executor publish what they do
//! on a shared [`EventBus`]; hosts subscribe to drive their UI.

mod bus;
mod types;

pub use bus::EventBus;
pub use types::*;
