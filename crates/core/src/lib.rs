//! Domain model shared by the agentflow crates.
//!
//! Everything in here is plain, serializable data: session states and
//! phases, action units with their status lifecycle, and the structured
//! error shape every phase failure is reported with.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::CoreError;
