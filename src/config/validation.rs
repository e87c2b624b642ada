//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("origin.user_agent must not be empty")]
    EmptyUserAgent,

    #[error("compression.min_compress_length exceeds compression.max_input_bytes")]
    ThresholdAboveLimit,
}

/// Check a parsed configuration for values that would break the proxy at runtime.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.origin.user_agent.trim().is_empty() {
        errors.push(ValidationError::EmptyUserAgent);
    }

    let timeouts = [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.origin_response_secs", config.timeouts.origin_response_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if config.compression.max_input_bytes == 0 {
        errors.push(ValidationError::Zero("compression.max_input_bytes"));
    } else if config.compression.min_compress_length > config.compression.max_input_bytes {
        errors.push(ValidationError::ThresholdAboveLimit);
    }

    if config.compression.max_dimension == 0 {
        errors.push(ValidationError::Zero("compression.max_dimension"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
