//! Configuration validation

use crate::{Config, ConfigError, EngineConfig, LoggingConfig, Result};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["compact", "pretty", "json"];

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

impl Config {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.logging.validate()?;
        if self.storage.state_dir.as_os_str().is_empty() {
            return Err(invalid("storage.state_dir", "must not be empty"));
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Validate engine tuning
    pub fn validate(&self) -> Result<()> {
        if self.power == 0 {
            return Err(invalid("engine.power", "must be at least 1"));
        }
        if self.sample_size == 0 {
            return Err(invalid("engine.sample_size", "must be at least 1"));
        }
        if self.tolerance_percent > 100 {
            return Err(invalid(
                "engine.tolerance_percent",
                format!("{} is above 100", self.tolerance_percent),
            ));
        }
        if self.time_slot_secs == 0 {
            return Err(invalid("engine.time_slot_secs", "must be non-zero"));
        }
        if self.job_lifetime_secs == 0 {
            return Err(invalid("engine.job_lifetime_secs", "must be non-zero"));
        }
        if self.idle_threshold_secs <= self.job_lifetime_secs {
            return Err(invalid(
                "engine.idle_threshold_secs",
                "must exceed engine.job_lifetime_secs",
            ));
        }
        if self.block_size == 0 || self.block_size % 2 != 0 {
            return Err(invalid(
                "engine.block_size",
                format!("{} must be non-zero and even", self.block_size),
            ));
        }
        Ok(())
    }
}

impl LoggingConfig {
    /// Validate logging settings
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(invalid("logging.level", format!("unknown level {:?}", self.level)));
        }
        if !LOG_FORMATS.contains(&self.format.to_ascii_lowercase().as_str()) {
            return Err(invalid(
                "logging.format",
                format!("unknown format {:?}", self.format),
            ));
        }
        if self.journal_verbosity > 2 {
            return Err(invalid("logging.journal_verbosity", "must be 0, 1 or 2"));
        }
        Ok(())
    }
}
