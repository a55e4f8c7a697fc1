//! Configuration structures

use crate::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "LIFELINE_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reinsertion engine tuning
    pub engine: EngineConfig,
    /// Where state lives on disk
    pub storage: StorageConfig,
    /// Process logging and per-document journals
    pub logging: LoggingConfig,
}

/// Reinsertion engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum concurrently running fetch/insert jobs
    pub power: usize,
    /// Blocks sampled per segment before deciding on health
    pub sample_size: usize,
    /// Minimum persistence rate (percent) for a segment to count as healthy
    pub tolerance_percent: u8,
    /// Wall-clock budget per document before yielding to the next one
    pub time_slot_secs: u64,
    /// Lifetime ceiling of a single fetch/insert job
    pub job_lifetime_secs: u64,
    /// How long a cancelled job is polled before giving up on it
    pub cancel_grace_secs: u64,
    /// A document pass without progress for this long is terminated
    pub idle_threshold_secs: u64,
    /// Canonical block size in bytes
    pub block_size: usize,
    /// Pause after a round in which every document was skipped
    pub idle_backoff_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            power: 6,
            sample_size: 18,
            tolerance_percent: 66,
            time_slot_secs: 4 * 3600,
            job_lifetime_secs: 30 * 60,
            cancel_grace_secs: 10 * 60,
            idle_threshold_secs: 35 * 60,
            block_size: 32 * 1024,
            idle_backoff_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Tolerance as a rate in `0.0..=1.0`
    pub fn tolerance(&self) -> f64 {
        f64::from(self.tolerance_percent) / 100.0
    }

    /// Per-document time slot
    pub fn time_slot(&self) -> Duration {
        Duration::from_secs(self.time_slot_secs)
    }

    /// Per-job lifetime ceiling
    pub fn job_lifetime(&self) -> Duration {
        Duration::from_secs(self.job_lifetime_secs)
    }

    /// Grace period for cancelled jobs
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    /// Watchdog idle threshold
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    /// Pause after an unproductive round
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_secs(self.idle_backoff_secs)
    }
}

/// On-disk locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the state file, manifests, journals and root cache
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("./lifeline-state"),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Process log level (trace, debug, info, warn, error)
    pub level: String,
    /// Process log format (compact, pretty, json)
    pub format: String,
    /// Per-document journal verbosity, 0 (outcomes only) to 2 (everything)
    pub journal_verbosity: u8,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            journal_verbosity: 1,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    /// and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Render configuration as TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `LIFELINE_*` overrides from the given variables
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "POWER" => self.engine.power = parse_env(&key, &value)?,
                "SAMPLE_SIZE" => self.engine.sample_size = parse_env(&key, &value)?,
                "TOLERANCE_PERCENT" => self.engine.tolerance_percent = parse_env(&key, &value)?,
                "TIME_SLOT_SECS" => self.engine.time_slot_secs = parse_env(&key, &value)?,
                "JOB_LIFETIME_SECS" => self.engine.job_lifetime_secs = parse_env(&key, &value)?,
                "CANCEL_GRACE_SECS" => self.engine.cancel_grace_secs = parse_env(&key, &value)?,
                "IDLE_THRESHOLD_SECS" => {
                    self.engine.idle_threshold_secs = parse_env(&key, &value)?
                }
                "BLOCK_SIZE" => self.engine.block_size = parse_env(&key, &value)?,
                "STATE_DIR" => self.storage.state_dir = PathBuf::from(value),
                "LOG_LEVEL" => self.logging.level = value,
                "LOG_FORMAT" => self.logging.format = value,
                "JOURNAL_VERBOSITY" => {
                    self.logging.journal_verbosity = parse_env(&key, &value)?
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::EnvVar(format!("{key}: cannot parse {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.power, 6);
        assert_eq!(config.engine.sample_size, 18);
        assert_eq!(config.engine.tolerance_percent, 66);
        assert_eq!(config.engine.cancel_grace(), Duration::from_secs(600));
        assert!((config.engine.tolerance() - 0.66).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [engine]
            power = 3
            tolerance_percent = 80

            [storage]
            state_dir = "/var/lib/lifeline"
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.power, 3);
        assert_eq!(config.engine.tolerance_percent, 80);
        assert_eq!(config.engine.sample_size, 18);
        assert_eq!(config.storage.state_dir, PathBuf::from("/var/lib/lifeline"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml_str("[engine\npower = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(vec![
                ("LIFELINE_POWER".to_string(), "12".to_string()),
                ("LIFELINE_STATE_DIR".to_string(), "/tmp/x".to_string()),
                ("OTHER_POWER".to_string(), "1".to_string()),
            ])
            .unwrap();

        assert_eq!(config.engine.power, 12);
        assert_eq!(config.storage.state_dir, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut config = Config::default();
        let result =
            config.apply_overrides(vec![("LIFELINE_POWER".to_string(), "many".to_string())]);
        assert!(matches!(result, Err(ConfigError::EnvVar(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nsample_size = 10").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.engine.sample_size, 10);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }
}
