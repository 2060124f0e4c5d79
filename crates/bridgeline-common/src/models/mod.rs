//! Core domain models shared across all Bridgeline crates.
//!
//! These are the "truth" types: what the queue stores, what the consumer
//! matches on, and what workers push to application services.

pub mod appservice;
pub mod event;

/// Re-export all model types for convenience.
pub use appservice::*;
pub use event::*;
