//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (percentage, port, timeouts)
//! - Check that the sampling selector and header agree
//! - Check that every route points at an absolute http URL
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ShadowConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ShadowConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("percentage is not between 0 and 100 (got {0})")]
    PercentageOutOfRange(f64),

    #[error("percentage-by ({0:?}) is not valid, expected \"\", \"header\" or \"remoteaddr\"")]
    UnknownSamplingKey(String),

    #[error("percentage-by is set to header, but percentage-by-header is empty")]
    MissingSamplingHeader,

    #[error("percentage-by-header ({0:?}) is not a valid header name")]
    InvalidSamplingHeader(String),

    #[error("filter-request-port is not between 0 and 65535 (got {0})")]
    PortOutOfRange(i64),

    #[error("route for host {host:?} has invalid base URL {url:?}: {reason}")]
    InvalidRoute {
        host: String,
        url: String,
        reason: String,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} ({value:?}) is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("capture needs either an interface or a pcap file")]
    NoCaptureSource,
}

/// Validate a fully merged configuration.
pub fn validate_config(config: &ShadowConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let sampling = &config.sampling;
    if !(0.0..=100.0).contains(&sampling.percentage) {
        errors.push(ValidationError::PercentageOutOfRange(sampling.percentage));
    }
    match sampling.by.as_str() {
        "" | "remoteaddr" => {}
        "header" => {
            if sampling.header.is_empty() {
                errors.push(ValidationError::MissingSamplingHeader);
            } else if http::HeaderName::from_bytes(sampling.header.as_bytes()).is_err() {
                errors.push(ValidationError::InvalidSamplingHeader(sampling.header.clone()));
            }
        }
        other => errors.push(ValidationError::UnknownSamplingKey(other.to_string())),
    }

    if !(0..=65535).contains(&config.capture.filter_port) {
        errors.push(ValidationError::PortOutOfRange(config.capture.filter_port));
    }
    if config.capture.interface.is_empty() && config.capture.pcap_file.is_none() {
        errors.push(ValidationError::NoCaptureSource);
    }
    if config.capture.channel_capacity == 0 {
        errors.push(ValidationError::Zero { field: "capture.channel_capacity" });
    }

    let mut hosts: Vec<_> = config.routes.keys().collect();
    hosts.sort();
    for host in hosts {
        if let Err(reason) = check_base_url(&config.routes[host]) {
            errors.push(ValidationError::InvalidRoute {
                host: host.clone(),
                url: config.routes[host].clone(),
                reason,
            });
        }
    }

    let reassembly = &config.reassembly;
    for (field, value) in [
        ("reassembly.idle_timeout_secs", reassembly.idle_timeout_secs),
        ("reassembly.flush_interval_secs", reassembly.flush_interval_secs),
        ("forward.timeout_secs", config.forward.timeout_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }
    if reassembly.max_buffered_bytes_per_flow == 0 {
        errors.push(ValidationError::Zero { field: "reassembly.max_buffered_bytes_per_flow" });
    }
    if reassembly.max_stream_backlog_bytes == 0 {
        errors.push(ValidationError::Zero { field: "reassembly.max_stream_backlog_bytes" });
    }

    if config.health.enabled {
        check_address(&mut errors, "health.bind_address", &config.health.bind_address);
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_base_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" {
        return Err(format!("scheme {:?} is not supported, use http", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err("base URL must not carry a query or fragment".to_string());
    }
    Ok(())
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
