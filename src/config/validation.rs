use std::{collections::HashSet, net::SocketAddr};

use eyre::Result;

use crate::config::models::{GatewayConfig, ServiceConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Unknown middleware '{name}' in service '{service}'")]
    UnknownMiddleware { service: String, name: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator.
///
/// Collects every problem it can find before failing, so an operator fixes a
/// broken config in one pass instead of one error at a time.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration against the set of
    /// registered middleware names.
    pub fn validate(config: &GatewayConfig, known_middlewares: &[&str]) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        let known: HashSet<&str> = known_middlewares.iter().copied().collect();
        for service in &config.services {
            if let Err(mut service_errors) = Self::validate_service(service, &known) {
                errors.append(&mut service_errors);
            }
        }

        if let Err(conflicts) = Self::check_prefix_conflicts(&config.services) {
            errors.extend(conflicts);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Validate a single service configuration
    fn validate_service(
        service: &ServiceConfig,
        known_middlewares: &HashSet<&str>,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if service.name.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "service name".to_string(),
            });
        }

        if !service.prefix.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{}' prefix", service.name),
                message: "Route prefixes must start with '/'".to_string(),
            });
        }

        if service.origins.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{}' origins", service.name),
                message: "Services must have at least one origin".to_string(),
            });
        } else {
            for (i, origin) in service.origins.iter().enumerate() {
                if let Err(e) = Self::validate_url(
                    origin,
                    &format!("service '{}' origin {}", service.name, i + 1),
                ) {
                    errors.push(e);
                }
            }
        }

        for name in &service.middlewares {
            if !known_middlewares.contains(name.as_str()) {
                errors.push(ValidationError::UnknownMiddleware {
                    service: service.name.clone(),
                    name: name.clone(),
                });
            }
        }

        if service.rate_limit.per_second > 0.0 && service.rate_limit.burst == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{}' rate_limit.burst", service.name),
                message: "Burst must be at least 1 when per_second is positive".to_string(),
            });
        }

        if service.circuit_breaker.failure_threshold == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{}' circuit_breaker.failure_threshold", service.name),
                message: "Failure threshold must be at least 1".to_string(),
            });
        }

        if let Err(e) = service.circuit_breaker.parsed_reset_timeout() {
            errors.push(ValidationError::InvalidField {
                field: format!("service '{}' circuit_breaker.reset_timeout", service.name),
                message: format!(
                    "Invalid duration '{}': {e}",
                    service.circuit_breaker.reset_timeout
                ),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Check for duplicate route prefixes across services
    fn check_prefix_conflicts(services: &[ServiceConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for service in services {
            if !seen.insert(service.prefix.as_str()) {
                errors.push(ValidationError::RouteConflict {
                    message: format!(
                        "Prefix '{}' is claimed by more than one service",
                        service.prefix
                    ),
                });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
