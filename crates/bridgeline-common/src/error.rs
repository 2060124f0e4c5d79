//! Startup-time error types for Bridgeline.
//!
//! Everything in here is a *permanent* failure: a broken registration or an
//! unreadable config file. None of these are retried; the process refuses to
//! start instead of running with a half-configured destination.

use crate::models::NamespaceKind;

/// Configuration and registration errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    // === Loading ===
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    // === Registrations ===
    #[error("Application service '{id}' is invalid: {message}")]
    InvalidRegistration { id: String, message: String },

    #[error("Application service '{id}' has an invalid {kind} namespace regex '{pattern}': {source}")]
    InvalidNamespace {
        id: String,
        kind: NamespaceKind,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Application service '{0}' is registered more than once")]
    DuplicateAppService(String),
}

impl ConfigError {
    /// Short machine-readable code, used as a structured log field.
    pub fn error_code(&self) -> &str {
        match self {
            Self::Load(_) => "CONFIG_LOAD",
            Self::InvalidRegistration { .. } => "INVALID_REGISTRATION",
            Self::InvalidNamespace { .. } => "INVALID_NAMESPACE",
            Self::DuplicateAppService(_) => "DUPLICATE_APPSERVICE",
        }
    }
}

/// Convenience type alias for Results using ConfigError.
pub type ConfigResult<T> = Result<T, ConfigError>;
