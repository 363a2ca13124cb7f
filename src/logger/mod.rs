//! Logging initialization built on tracing-subscriber.
//!
//! Supports console output in full, compact, or JSON format. The log level
//! can be overridden at runtime via the standard `RUST_LOG` variable.

use tracing_subscriber::EnvFilter;

use crate::config::settings::LoggerSettings;
use crate::error::{AppError, AppResult};

/// Output format for log records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Full,
    Compact,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(LogFormat::Full),
            "compact" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Initializes the global tracing subscriber from logger settings.
///
/// `RUST_LOG` takes precedence over the configured level so operators can
/// raise verbosity without editing configuration files.
pub fn init_logger(settings: &LoggerSettings) -> AppResult<()> {
    let format = LogFormat::parse(&settings.format).ok_or_else(|| AppError::Configuration {
        key: "logger.format".to_string(),
        source: anyhow::anyhow!(
            "Unknown log format '{}', expected full, compact, or json",
            settings.format
        ),
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| AppError::Configuration {
            key: "logger.level".to_string(),
            source: anyhow::Error::from(e),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(settings.colored);

    let result = match format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| AppError::Configuration {
        key: "logger".to_string(),
        source: anyhow::anyhow!("Failed to install tracing subscriber: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_formats() {
        assert_eq!(LogFormat::parse("full"), Some(LogFormat::Full));
        assert_eq!(LogFormat::parse("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("json"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("yaml"), None);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let settings = LoggerSettings {
            format: "yaml".to_string(),
            ..Default::default()
        };
        assert!(init_logger(&settings).is_err());
    }
}
