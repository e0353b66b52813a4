// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as non-zero budgets, ordered delay bounds, and known log levels.

use crate::diagnostic::ConfigError;
use crate::model::CourierConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &CourierConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let level = config.logging.level.trim().to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "logging.level `{}` is not one of {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            ),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.queue.max_retry_time_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "queue.max_retry_time_secs must be greater than zero".to_string(),
        });
    }

    if config.queue.max_attempts == Some(0) {
        errors.push(ConfigError::Validation {
            message: "queue.max_attempts must be at least 1 when set".to_string(),
        });
    }

    if config.retry.default_delay_ms > config.retry.max_delay_ms {
        errors.push(ConfigError::Validation {
            message: format!(
                "retry.default_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                config.retry.default_delay_ms, config.retry.max_delay_ms
            ),
        });
    }

    if config.resend.retry_limit == 0 {
        errors.push(ConfigError::Validation {
            message: "resend.retry_limit must be at least 1".to_string(),
        });
    }

    if config.resend.placeholder_ttl_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "resend.placeholder_ttl_secs must be greater than zero".to_string(),
        });
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

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&CourierConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = CourierConfig::default();
        config.logging.level = "loud".into();
        config.queue.max_retry_time_secs = 0;
        config.retry.default_delay_ms = 120_000;
        config.resend.retry_limit = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn uppercase_log_level_is_accepted() {
        let mut config = CourierConfig::default();
        config.logging.level = "DEBUG".into();
        assert!(validate_config(&config).is_ok());
    }
}
