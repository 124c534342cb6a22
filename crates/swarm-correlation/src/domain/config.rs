//! Correlation engine configuration with validation.
//!
//! # Example
//!
//! ```toml
//! default_timeout = "30s"
//! listener_count = 4
//! match_strategy = { kind = "correlation_id" }
//!
//! [sweeper]
//! mode = "adaptive"
//! max_lateness = "50ms"
//! idle_interval = "1s"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::message::ReplyConvention;
use crate::error::ConfigError;

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Reply timeout used when a request does not carry its own
    #[serde(with = "duration_serde")]
    pub default_timeout: Duration,
    /// Number of listener tasks draining inbound messages
    pub listener_count: usize,
    /// How match ids are stamped and extracted
    pub match_strategy: MatchStrategy,
    /// Expiry sweeper tuning
    pub sweeper: SweeperConfig,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            listener_count: 1,
            match_strategy: MatchStrategy::default(),
            sweeper: SweeperConfig::default(),
        }
    }
}

impl CorrelationConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `SWARM_REPLY_TIMEOUT`: default reply timeout (`"500ms"`, `"30s"`, `"2m"`)
    /// - `SWARM_LISTENERS`: listener task count
    /// - `SWARM_SWEEP_MODE`: `periodic` or `adaptive`
    /// - `SWARM_MAX_LATENESS`: sweeper lateness bound
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = env::var("SWARM_REPLY_TIMEOUT") {
            self.default_timeout = duration_serde::parse_duration(&v)
                .map_err(|e| ConfigError::InvalidTimeout(format!("SWARM_REPLY_TIMEOUT: {e}")))?;
        }

        if let Ok(v) = env::var("SWARM_LISTENERS") {
            self.listener_count = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidListeners(format!("SWARM_LISTENERS={v}")))?;
        }

        if let Ok(v) = env::var("SWARM_SWEEP_MODE") {
            self.sweeper.mode = match v.trim().to_lowercase().as_str() {
                "periodic" => SweepMode::Periodic,
                "adaptive" => SweepMode::Adaptive,
                other => {
                    return Err(ConfigError::InvalidSweeper(format!(
                        "unknown sweep mode: {other}"
                    )))
                }
            };
        }

        if let Ok(v) = env::var("SWARM_MAX_LATENESS") {
            self.sweeper.max_lateness = duration_serde::parse_duration(&v)
                .map_err(|e| ConfigError::InvalidSweeper(format!("SWARM_MAX_LATENESS: {e}")))?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default_timeout cannot be 0".into(),
            ));
        }

        if self.listener_count == 0 {
            return Err(ConfigError::InvalidListeners(
                "listener_count cannot be 0".into(),
            ));
        }

        if let MatchStrategy::Property { name } = &self.match_strategy {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidStrategy(
                    "property name cannot be empty".into(),
                ));
            }
        }

        self.sweeper.validate()
    }
}

/// Correlation strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Reply's correlation id echoes the request's message id
    #[default]
    MessageId,
    /// Request carries a generated correlation id, echoed by the reply
    CorrelationId,
    /// Request carries a generated token in a named property
    Property { name: String },
}

impl MatchStrategy {
    /// How a responder must build replies for this strategy to match them.
    pub fn reply_convention(&self) -> ReplyConvention {
        match self {
            Self::MessageId => ReplyConvention::CopyMessageId,
            Self::CorrelationId | Self::Property { .. } => ReplyConvention::PassCorrelationId,
        }
    }
}

/// Sweeper scheduling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Fixed tick every `max_lateness`
    Periodic,
    /// Sleep until the earliest deadline
    #[default]
    Adaptive,
}

/// Expiry sweeper configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub mode: SweepMode,
    /// Upper bound between a deadline and its timeout delivery (periodic tick)
    #[serde(with = "duration_serde")]
    pub max_lateness: Duration,
    /// Longest adaptive sleep when nothing is pending
    #[serde(with = "duration_serde")]
    pub idle_interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            mode: SweepMode::Adaptive,
            max_lateness: Duration::from_millis(50),
            idle_interval: Duration::from_secs(1),
        }
    }
}

impl SweeperConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_lateness.is_zero() {
            return Err(ConfigError::InvalidSweeper(
                "max_lateness cannot be 0".into(),
            ));
        }

        if self.idle_interval.is_zero() {
            return Err(ConfigError::InvalidSweeper(
                "idle_interval cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

/// Human-readable duration (de)serialization: `"250ms"`, `"30s"`, `"2m"`.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse a duration with a unit suffix. A bare integer is seconds.
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }
        humantime::parse_duration(s).map_err(|e| format!("invalid duration {s:?}: {e}"))
    }
}
