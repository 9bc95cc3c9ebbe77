//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (workers > 0, timeouts > 0, body limit > 0)
//! - Check middleware name lists and proxy mounts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::AppConfig;

/// One semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
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

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.workers == 0 {
        errors.push(ValidationError::new("workers", "must be at least 1"));
    }
    if config.listener.max_body_size == 0 {
        errors.push(ValidationError::new("listener.max_body_size", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }
    if config.observability.metrics_enabled && config.observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", config.observability.metrics_address),
        ));
    }

    check_names("middlewares.sync", &config.middlewares.sync, &mut errors);
    check_names("middlewares.async", &config.middlewares.r#async, &mut errors);

    let mut paths = HashSet::new();
    for (i, mount) in config.proxies.iter().enumerate() {
        let field = format!("proxies[{}]", i);
        if !mount.path.starts_with('/') {
            errors.push(ValidationError::new(&field, format!("path `{}` must start with '/'", mount.path)));
        }
        if !paths.insert(mount.path.trim_end_matches('/')) {
            errors.push(ValidationError::new(&field, format!("path `{}` is mounted twice", mount.path)));
        }
        match url::Url::parse(&mount.upstream) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
            _ => errors.push(ValidationError::new(
                &field,
                format!("upstream `{}` must be an http(s) URL", mount.upstream),
            )),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_names(field: &str, names: &[String], errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            errors.push(ValidationError::new(field, "middleware name must not be empty"));
        } else if !seen.insert(name.as_str()) {
            errors.push(ValidationError::new(field, format!("`{}` is listed twice", name)));
        }
    }
}
