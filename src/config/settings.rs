//! Configuration settings structures for reportflow
//!
//! This module defines all configuration structures that can be loaded from
//! TOML files and environment variables.

use serde::{Deserialize, Serialize};
use validator::ValidateEmail;

use crate::config::error::ConfigError;

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "reportflow".to_string()
}

fn default_app_version() -> String {
    crate::pkg_version().to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_retention_sweep_cron() -> String {
    // Daily at 03:00
    "0 0 3 * * *".to_string()
}

fn default_retention_days() -> i64 {
    90
}

fn default_max_attempts() -> i32 {
    3
}

fn default_backoff_seconds() -> Vec<u64> {
    vec![60, 300, 900]
}

fn default_delivery_timeout() -> u64 {
    120
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "reports@localhost".to_string()
}

fn default_from_name() -> String {
    "Reportflow Reports".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "full".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Application Configuration
// ============================================================================

/// Application basic information configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Application version
    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

// ============================================================================
// Database Configuration
// ============================================================================

/// Diesel database connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[serde(default)]
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Whether to automatically run pending migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout: default_connection_timeout(),
            auto_migrate: false,
        }
    }
}

impl DatabaseConfig {
    /// Validates the database configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::validation(
                "database.url",
                "Database URL cannot be empty",
            ));
        }

        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ConfigError::validation(
                "database.url",
                "Database URL must be a postgres:// connection string",
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "database.max_connections",
                "Connection pool must allow at least one connection",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::validation(
                "database.min_connections",
                "Minimum connections cannot exceed maximum connections",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Scheduler Configuration
// ============================================================================

/// Dispatcher clock and retention sweep configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Dispatcher poll interval in seconds
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,

    /// Cron expression for the delivery log retention sweep
    #[serde(default = "default_retention_sweep_cron")]
    pub retention_sweep_cron: String,

    /// Delivery logs older than this many days are purged by the sweep
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            retention_sweep_cron: default_retention_sweep_cron(),
            retention_days: default_retention_days(),
        }
    }
}

impl SchedulerConfig {
    /// Validates the scheduler configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_seconds == 0 {
            return Err(ConfigError::validation(
                "scheduler.tick_seconds",
                "Dispatcher tick interval must be at least one second",
            ));
        }

        if self.retention_days <= 0 {
            return Err(ConfigError::validation(
                "scheduler.retention_days",
                "Retention period must be positive",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Delivery Configuration
// ============================================================================

/// Retry and timeout configuration for the delivery tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Maximum send attempts before a delivery is permanently failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// Backoff tiers in seconds applied after the 1st, 2nd, ... failures.
    /// Failures beyond the last tier reuse the final value.
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: Vec<u64>,

    /// Upper bound in seconds for a single generate-and-send attempt
    #[serde(default = "default_delivery_timeout")]
    pub timeout_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff_seconds(),
            timeout_seconds: default_delivery_timeout(),
        }
    }
}

impl DeliveryConfig {
    /// Validates the delivery configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < 1 {
            return Err(ConfigError::validation(
                "delivery.max_attempts",
                "At least one delivery attempt is required",
            ));
        }

        if self.backoff_seconds.is_empty() {
            return Err(ConfigError::validation(
                "delivery.backoff_seconds",
                "At least one backoff tier is required",
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::validation(
                "delivery.timeout_seconds",
                "Delivery timeout must be at least one second",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// SMTP Configuration
// ============================================================================

/// SMTP transport configuration for the mail sender.
///
/// When credentials are absent the mailer falls back to logging rendered
/// messages instead of transmitting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP relay hostname
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// SMTP relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// SMTP username; console fallback is used when absent
    #[serde(default)]
    pub username: Option<String>,

    /// SMTP password
    #[serde(default)]
    pub password: Option<String>,

    /// Sender address placed in the From header
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Display name placed in the From header
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: None,
            password: None,
            from_address: default_from_address(),
            from_name: default_from_name(),
        }
    }
}

impl SmtpConfig {
    /// Whether credentials are configured for a real SMTP transport
    pub fn is_configured(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Validates the SMTP configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::validation(
                "smtp.host",
                "SMTP host cannot be empty",
            ));
        }

        if !self.from_address.validate_email() {
            return Err(ConfigError::validation(
                "smtp.from_address",
                "Sender address must be a valid email address",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Logger Configuration
// ============================================================================

/// Logger configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "full", "compact", or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to use colored output
    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colored: default_true(),
        }
    }
}

// ============================================================================
// Root Settings
// ============================================================================

/// Root configuration loaded from files and environment variables
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application information
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Database connection settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Dispatcher clock settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Delivery retry settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// SMTP transport settings
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Logger settings
    #[serde(default)]
    pub logger: LoggerSettings,
}

impl Settings {
    /// Validates all configuration sections.
    ///
    /// The database URL is validated separately by the commands that need a
    /// connection, so a bare `Settings::default()` stays valid for tooling.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        self.delivery.validate()?;
        self.smtp.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.scheduler.tick_seconds, 60);
        assert_eq!(settings.delivery.max_attempts, 3);
        assert_eq!(settings.delivery.backoff_seconds, vec![60, 300, 900]);
        assert_eq!(settings.scheduler.retention_days, 90);
    }

    #[test]
    fn test_database_url_validation() {
        let mut config = DatabaseConfig::default();
        assert!(config.validate().is_err());

        config.url = "mysql://localhost/nope".to_string();
        assert!(config.validate().is_err());

        config.url = "postgres://localhost/reportflow".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delivery_validation_rejects_zero_attempts() {
        let config = DeliveryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delivery_validation_rejects_empty_backoff() {
        let config = DeliveryConfig {
            backoff_seconds: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_smtp_fallback_detection() {
        let mut config = SmtpConfig::default();
        assert!(!config.is_configured());

        config.username = Some("mailer".to_string());
        config.password = Some("secret".to_string());
        assert!(config.is_configured());
    }

    #[test]
    fn test_smtp_from_address_validation() {
        let config = SmtpConfig {
            from_address: "not an address".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
