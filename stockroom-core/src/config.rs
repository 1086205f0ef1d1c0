//! Configuration management

use crate::async_utils::RetryConfig;
use crate::error::{ErrorContext, StockroomError, StockroomResult};
use crate::logging::LoggingConfig;
use crate::types::PLACEHOLDER_DISPLAY_NAME;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level Stockroom configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StockroomConfig {
    pub session: SessionConfig,
    pub profile: ProfileConfig,
    pub logging: LoggingConfig,
}

/// Session state machine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on the one-shot initial session snapshot
    pub initial_session_timeout_ms: u64,
    /// Lifetime of sessions issued by the in-memory identity provider
    pub session_ttl_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_session_timeout_ms: 10_000,
            session_ttl_minutes: 60,
        }
    }
}

/// Profile loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Per-attempt time bound for profile store calls
    pub fetch_timeout_ms: u64,
    /// Additional fetch attempts after the first one
    pub max_retries: usize,
    /// Backoff before the first retry; doubles on each further retry
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    /// Keep retrying while the profile is missing, before provisioning one
    pub retry_not_found: bool,
    /// Display name given to auto-provisioned profiles
    pub placeholder_display_name: String,
    /// Time bound for profile updates
    pub write_timeout_ms: u64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 15_000,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: false,
            retry_not_found: true,
            placeholder_display_name: PLACEHOLDER_DISPLAY_NAME.to_string(),
            write_timeout_ms: 15_000,
        }
    }
}

impl ProfileConfig {
    /// Backoff policy used for profile fetches
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            backoff_multiplier: 2.0,
            jitter: self.jitter,
        }
    }
}

impl StockroomConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> StockroomResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StockroomError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: StockroomConfig =
            toml::from_str(&content).map_err(|e| StockroomError::Config {
                message: format!("Failed to parse config: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("config")
                    .with_operation("parse_toml")
                    .with_suggestion("Check TOML syntax in config file"),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> StockroomResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| StockroomError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| StockroomError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> StockroomResult<()> {
        if self.profile.fetch_timeout_ms == 0 {
            return Err(crate::config_error!(
                "profile.fetch_timeout_ms must be greater than 0",
                "config",
                "Set profile.fetch_timeout_ms to a positive value",
            ));
        }

        if self.profile.write_timeout_ms == 0 {
            return Err(crate::config_error!(
                "profile.write_timeout_ms must be greater than 0",
                "config",
                "Set profile.write_timeout_ms to a positive value",
            ));
        }

        if self.profile.base_delay_ms > self.profile.max_delay_ms {
            return Err(crate::config_error!(
                "profile.base_delay_ms must not exceed profile.max_delay_ms",
                "config",
                "Lower profile.base_delay_ms or raise profile.max_delay_ms",
            ));
        }

        if self.profile.placeholder_display_name.trim().is_empty() {
            return Err(crate::config_error!(
                "profile.placeholder_display_name must not be empty",
                "config",
                "Set a placeholder name for auto-provisioned profiles",
            ));
        }

        if self.session.initial_session_timeout_ms == 0 {
            return Err(crate::config_error!(
                "session.initial_session_timeout_ms must be greater than 0",
                "config",
                "Set session.initial_session_timeout_ms to a positive value",
            ));
        }

        if self.session.session_ttl_minutes <= 0 {
            return Err(crate::config_error!(
                "session.session_ttl_minutes must be greater than 0",
                "config",
                "Set session.session_ttl_minutes to a positive value",
            ));
        }

        Ok(())
    }

    /// Apply a `section.key = value` override, as used by `stockroom config set`
    pub fn set_value(&mut self, key: &str, value: &str) -> StockroomResult<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> StockroomResult<T> {
            value.parse().map_err(|_| {
                let message = format!("Invalid value '{}' for {}", value, key);
                crate::validation_error!(message, key, "config")
            })
        }

        let mut next = self.clone();

        match key {
            "session.initial_session_timeout_ms" => {
                next.session.initial_session_timeout_ms = parse(key, value)?
            }
            "session.session_ttl_minutes" => next.session.session_ttl_minutes = parse(key, value)?,
            "profile.fetch_timeout_ms" => next.profile.fetch_timeout_ms = parse(key, value)?,
            "profile.max_retries" => next.profile.max_retries = parse(key, value)?,
            "profile.base_delay_ms" => next.profile.base_delay_ms = parse(key, value)?,
            "profile.max_delay_ms" => next.profile.max_delay_ms = parse(key, value)?,
            "profile.jitter" => next.profile.jitter = parse(key, value)?,
            "profile.retry_not_found" => next.profile.retry_not_found = parse(key, value)?,
            "profile.placeholder_display_name" => {
                next.profile.placeholder_display_name = value.to_string()
            }
            "profile.write_timeout_ms" => next.profile.write_timeout_ms = parse(key, value)?,
            "logging.level" => next.logging.level = value.to_string(),
            "logging.format" => {
                next.logging.format = value
                    .parse()
                    .map_err(|e: String| crate::validation_error!(e, key, "config"))?
            }
            _ => {
                return Err(crate::config_error!(
                    format!("Unknown configuration key: {}", key),
                    "config"
                ))
            }
        }

        next.validate()?;
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StockroomConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.profile.retry_config().max_attempts(), 4);
    }

    #[test]
    fn test_set_value() {
        let mut config = StockroomConfig::default();
        config.set_value("profile.max_retries", "5").unwrap();
        config.set_value("logging.format", "json").unwrap();
        assert_eq!(config.profile.max_retries, 5);
        assert_eq!(config.logging.format, crate::LogFormat::Json);

        assert!(config.set_value("profile.max_retries", "many").is_err());
        assert!(config.set_value("profile.unknown", "1").is_err());
        assert!(config.set_value("profile.fetch_timeout_ms", "0").is_err());
    }

    #[test]
    fn test_errors_carry_field_and_suggestions() {
        let mut config = StockroomConfig::default();

        match config.set_value("profile.max_retries", "many") {
            Err(StockroomError::Validation { field, context, .. }) => {
                assert_eq!(field.as_deref(), Some("profile.max_retries"));
                assert_eq!(context.component, "config");
            }
            other => panic!("Expected Validation error, got {:?}", other),
        }

        config.profile.write_timeout_ms = 0;
        match config.validate() {
            Err(StockroomError::Config { message, context, .. }) => {
                assert!(message.contains("write_timeout_ms"));
                assert_eq!(
                    context.recovery_suggestions.first().map(String::as_str),
                    Some("Set profile.write_timeout_ms to a positive value")
                );
            }
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: StockroomConfig = toml::from_str(
            r#"
            [profile]
            max_retries = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.profile.max_retries, 1);
        assert_eq!(config.profile.fetch_timeout_ms, 15_000);
        assert_eq!(config.session, SessionConfig::default());
    }
}
