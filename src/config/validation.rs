//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject an empty backend pool and unparseable upstream addresses
//! - Validate value ranges (timeouts > 0, thresholds >= 1, socket addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::load_balancer::backend::parse_upstream_url;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::new(
            "backends",
            "at least one backend is required",
        ));
    }

    for (i, backend) in config.backends.iter().enumerate() {
        if let Err(reason) = parse_upstream_url(&backend.address) {
            errors.push(ValidationError::new(format!("backends[{}].address", i), reason));
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    let health = &config.health_check;
    if health.active || health.passive {
        if health.unhealthy_threshold == 0 {
            errors.push(ValidationError::new(
                "health_check.unhealthy_threshold",
                "must be >= 1",
            ));
        }
        if health.healthy_threshold == 0 {
            errors.push(ValidationError::new(
                "health_check.healthy_threshold",
                "must be >= 1",
            ));
        }
        if health.interval_secs == 0 {
            errors.push(ValidationError::new("health_check.interval_secs", "must be > 0"));
        }
    }
    if health.active {
        if health.timeout_secs == 0 {
            errors.push(ValidationError::new("health_check.timeout_secs", "must be > 0"));
        }
        if !health.path.starts_with('/') {
            errors.push(ValidationError::new("health_check.path", "must start with '/'"));
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
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
    use crate::config::BackendConfig;

    fn valid_config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.backends.push(BackendConfig::new("http://127.0.0.1:9001"));
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_empty_pool_rejected() {
        let errors = validate_config(&ProxyConfig::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "backends");
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid_config();
        config.listener.bind_address = "not-an-address".into();
        config.backends.push(BackendConfig::new(""));
        config.backends.push(BackendConfig::new("https://secure.example.com"));
        config.timeouts.request_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "backends[1].address",
                "backends[2].address",
                "timeouts.request_secs",
            ]
        );
    }

    #[test]
    fn test_health_thresholds_checked_only_when_enabled() {
        let mut config = valid_config();
        config.health_check.unhealthy_threshold = 0;
        assert!(validate_config(&config).is_ok());

        config.health_check.passive = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "health_check.unhealthy_threshold");
    }

    #[test]
    fn test_passive_only_needs_readmit_interval() {
        let mut config = valid_config();
        config.health_check.passive = true;
        config.health_check.interval_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["health_check.interval_secs"]);
    }
}
