//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, pool bounds ordered)
//! - Check addresses parse before threads are started
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("buffers.min_buffers ({min}) must not exceed buffers.max_buffers ({max})")]
    PoolBounds { min: usize, max: usize },

    #[error("invalid {field} '{value}'")]
    Address { field: &'static str, value: String },
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let positive = [
        ("listener.accept_queue_capacity", config.listener.accept_queue_capacity),
        ("workers.count", config.workers.count),
        ("workers.events_capacity", config.workers.events_capacity),
        ("buffers.size", config.buffers.size),
        ("buffers.max_buffers", config.buffers.max_buffers),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if config.monitor.enabled && config.monitor.update_interval_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "monitor.update_interval_secs",
        });
    }

    if config.buffers.min_buffers > config.buffers.max_buffers {
        errors.push(ValidationError::PoolBounds {
            min: config.buffers.min_buffers,
            max: config.buffers.max_buffers,
        });
    }

    if config.listener.bind_address.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::Address {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::Address {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
