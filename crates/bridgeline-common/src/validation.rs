//! Registration validation utilities.

use validator::Validate;

use crate::config::AppServiceRegistration;
use crate::error::ConfigError;

/// Validate a registration, returning `ConfigError::InvalidRegistration` on failure.
pub fn validate_registration(reg: &AppServiceRegistration) -> Result<(), ConfigError> {
    reg.validate().map_err(|e| ConfigError::InvalidRegistration {
        id: reg.id.clone(),
        message: format_validation_errors(e),
    })?;

    let scheme = url::Url::parse(&reg.url).map(|u| u.scheme().to_owned());
    if !matches!(scheme.as_deref(), Ok("http" | "https")) {
        return Err(ConfigError::InvalidRegistration {
            id: reg.id.clone(),
            message: "url must use http or https".into(),
        });
    }

    if reg.sender_localpart.contains(':') || reg.sender_localpart.starts_with('@') {
        return Err(ConfigError::InvalidRegistration {
            id: reg.id.clone(),
            message: "sender_localpart must be a bare localpart, not a user ID".into(),
        });
    }

    Ok(())
}

/// Format validation errors into a human-readable string.
fn format_validation_errors(errors: validator::ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for '{field}'"))
            })
        })
        .collect();
    // field_errors() is a HashMap; keep output stable for logs and tests.
    messages.sort();
    messages.join("; ")
}
