// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Courier delivery pipeline.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Courier configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Per-destination send queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Backoff settings for retryable send failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Decryption-error resend settings.
    #[serde(default)]
    pub resend: ResendConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database holding group-send tokens and retry placeholders.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("courier").join("courier.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("courier.db"))
        .to_string_lossy()
        .into_owned()
}

/// Send queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Wall-clock budget for one job, measured from its enqueue time.
    #[serde(default = "default_max_retry_time_secs")]
    pub max_retry_time_secs: u64,

    /// Attempt cap. Derived from the backoff schedule when unset.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// How many 409 device-list corrections one recipient send may go through.
    #[serde(default = "default_max_device_reconciliations")]
    pub max_device_reconciliations: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retry_time_secs: default_max_retry_time_secs(),
            max_attempts: None,
            max_device_reconciliations: default_max_device_reconciliations(),
        }
    }
}

impl QueueConfig {
    pub fn max_retry_time(&self) -> Duration {
        Duration::from_secs(self.max_retry_time_secs)
    }
}

fn default_max_retry_time_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_device_reconciliations() -> u32 {
    5
}

/// Retry backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Delay used when a retryable error carries no retry-after value.
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,

    /// Ceiling for delays that did not come from the server.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_delay_ms() -> u64 {
    60_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

/// Decryption-error resend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResendConfig {
    /// Maximum handled requests per `sender.device:timestamp` key.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Messages older than this are not resent on a peer's request.
    #[serde(default = "default_respond_max_age_secs")]
    pub respond_max_age_secs: u64,

    /// How long a placeholder waits for the retried message.
    #[serde(default = "default_placeholder_ttl_secs")]
    pub placeholder_ttl_secs: u64,

    /// Minimum gap between automatic session resets for one address.
    #[serde(default = "default_session_reset_cooldown_secs")]
    pub session_reset_cooldown_secs: u64,

    /// Base delay before a decryption error is handled.
    #[serde(default = "default_decryption_error_delay_ms")]
    pub decryption_error_delay_ms: u64,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            respond_max_age_secs: default_respond_max_age_secs(),
            placeholder_ttl_secs: default_placeholder_ttl_secs(),
            session_reset_cooldown_secs: default_session_reset_cooldown_secs(),
            decryption_error_delay_ms: default_decryption_error_delay_ms(),
        }
    }
}

fn default_retry_limit() -> u32 {
    5
}

fn default_respond_max_age_secs() -> u64 {
    14 * 24 * 60 * 60
}

fn default_placeholder_ttl_secs() -> u64 {
    60 * 60
}

fn default_session_reset_cooldown_secs() -> u64 {
    60 * 60
}

fn default_decryption_error_delay_ms() -> u64 {
    1_000
}
