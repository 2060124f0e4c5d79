//! # bridgeline-common
//!
//! Shared types, configuration, error handling, and registration validation
//! used across all Bridgeline crates.
//! This is the foundation layer: no delivery logic, just primitives and contracts.

pub mod config;
pub mod error;
pub mod models;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use models::{ApplicationService, Event, Namespace, NamespaceKind, StreamPosition};
