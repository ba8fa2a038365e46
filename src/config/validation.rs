//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, value ranges and TLS file settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("{value:?} is not a socket address"),
        ));
    }
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if let Some(tls) = &config.listener.tls {
        check_address(&mut errors, "listener.tls.bind_address", &tls.bind_address);
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.cert_path", "must not be empty"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::new("listener.tls.key_path", "must not be empty"));
        }
        if tls.bind_address == config.listener.bind_address {
            errors.push(ValidationError::new(
                "listener.tls.bind_address",
                "must differ from listener.bind_address",
            ));
        }
    }

    if let Some(home) = &config.home.path {
        if !home.is_absolute() {
            errors.push(ValidationError::new("home.path", "must be an absolute path"));
        }
    }

    if config.runtime.default_binary.trim().is_empty() {
        errors.push(ValidationError::new("runtime.default_binary", "must not be empty"));
    }
    for (version, binary) in &config.runtime.versions {
        if binary.trim().is_empty() {
            errors.push(ValidationError::new(
                &format!("runtime.versions.{version}"),
                "must not be empty",
            ));
        }
    }
    if config.runtime.max_body_bytes == 0 {
        errors.push(ValidationError::new("runtime.max_body_bytes", "must be greater than 0"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.proxy_connect_secs == 0 {
        errors.push(ValidationError::new(
            "timeouts.proxy_connect_secs",
            "must be greater than 0",
        ));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("must be one of {}", LOG_LEVELS.join(", ")),
        ));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;
    use std::path::PathBuf;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "localhost".to_string();
        config.listener.tls = Some(TlsConfig {
            bind_address: "127.0.0.1:8443".to_string(),
            cert_path: String::new(),
            key_path: "key.pem".to_string(),
        });
        config.home.path = Some(PathBuf::from("relative/home"));
        config.timeouts.request_secs = 0;
        config.observability.log_level = "loud".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.tls.cert_path",
                "home.path",
                "timeouts.request_secs",
                "observability.log_level",
            ]
        );
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = ServerConfig::default();
        config.observability.metrics_address = "nope".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
