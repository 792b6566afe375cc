//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check service definitions (unique names, parseable addresses)
//! - Validate value ranges (timeouts > 0, limits > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use url::Url;

use super::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A numeric setting is outside its allowed range.
    OutOfRange { field: String, reason: String },
    /// A service name appears more than once.
    DuplicateService(String),
    /// A service definition is incomplete or malformed.
    InvalidService { service: String, reason: String },
    /// A socket address could not be parsed.
    InvalidAddress { field: String, value: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::OutOfRange { field, reason } => write!(f, "{}: {}", field, reason),
            ValidationError::DuplicateService(name) => write!(f, "duplicate service name '{}'", name),
            ValidationError::InvalidService { service, reason } => write!(f, "service '{}': {}", service, reason),
            ValidationError::InvalidAddress { field, value } => {
                write!(f, "{}: '{}' is not a socket address", field, value)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

fn out_of_range(field: &str, reason: &str) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.max_connections == 0 {
        errors.push(out_of_range("listener.max_connections", "must be greater than 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(out_of_range("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(out_of_range("timeouts.request_secs", "must be greater than 0"));
    }
    if config.pool.enabled && config.pool.keepalive_timeout_secs == 0 {
        errors.push(out_of_range("pool.keepalive_timeout_secs", "must be greater than 0 when pooling"));
    }
    if config.retries.connect_attempts == 0 {
        errors.push(out_of_range("retries.connect_attempts", "must be at least 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(out_of_range("retries.base_delay_ms", "must not exceed retries.max_delay_ms"));
    }
    if config.limits.max_header_bytes == 0 || config.limits.max_body_bytes == 0 || config.limits.max_frame_bytes == 0 {
        errors.push(out_of_range("limits", "every limit must be greater than 0"));
    }

    if config.observability.metrics_enabled && config.observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address".to_string(),
            value: config.observability.metrics_address.clone(),
        });
    }
    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field: "admin.bind_address".to_string(),
                value: config.admin.bind_address.clone(),
            });
        }
        if config.admin.api_key.trim().is_empty() {
            errors.push(out_of_range("admin.api_key", "must not be empty when admin is enabled"));
        }
    }

    let mut names = HashSet::new();
    for service in &config.services {
        let invalid = |reason: String| ValidationError::InvalidService {
            service: service.name.clone(),
            reason,
        };
        if service.name.trim().is_empty() {
            errors.push(invalid("name must not be empty".to_string()));
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if service.accept.is_empty() {
            errors.push(invalid("at least one accept URI is required".to_string()));
        }
        for uri in service.accept.iter().chain(service.connect.iter()) {
            if let Err(e) = Url::parse(uri) {
                errors.push(invalid(format!("'{}' is not a valid URI: {}", uri, e)));
            }
        }
        if service.service_type != "echo" && service.connect.is_none() {
            errors.push(invalid(format!("type '{}' requires a connect URI", service.service_type)));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
