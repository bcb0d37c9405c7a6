//! Engine configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Pre-configured response when the model reports a referenced file as
/// missing from its context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingFileChoice {
    /// Supply the file content and let the model continue.
    Load,
    /// Drop subsequent operations that target the missing path.
    Skip,
    /// Let the model overwrite the file from scratch.
    Overwrite,
}

/// Stream handling configuration: retry budget and timeouts.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Maximum reply-stream attempts per tell session.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Seconds without a fragment before the attempt is failed as stalled.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_seconds: u64,
    /// Response applied when the model reports a missing file.
    #[serde(default = "default_missing_file_choice")]
    pub missing_file_choice: MissingFileChoice,
    /// Buffered events per attached observer before lagging events are dropped.
    #[serde(default = "default_observer_capacity")]
    pub observer_channel_capacity: usize,
}

fn default_retry_limit() -> u32 {
    4
}

fn default_inactivity_timeout() -> u64 {
    120
}

fn default_missing_file_choice() -> MissingFileChoice {
    MissingFileChoice::Load
}

fn default_observer_capacity() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            inactivity_timeout_seconds: default_inactivity_timeout(),
            missing_file_choice: default_missing_file_choice(),
            observer_channel_capacity: default_observer_capacity(),
        }
    }
}

/// Model configuration snapshot carried by each session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ModelSettings {
    /// Provider identifier (e.g. `openai`).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name requested from the provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum output tokens requested per reply.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_output_tokens() -> u32 {
    8192
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Engine configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Path of the `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Stream retry and timeout settings.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Model settings snapshot applied to new sessions.
    #[serde(default)]
    pub model: ModelSettings,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tellstream.db")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            stream: StreamConfig::default(),
            model: ModelSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Inactivity timeout as a [`Duration`].
    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.stream.inactivity_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.stream.retry_limit == 0 {
            return Err(AppError::Config(
                "stream.retry_limit must be greater than zero".into(),
            ));
        }

        if self.stream.inactivity_timeout_seconds == 0 {
            return Err(AppError::Config(
                "stream.inactivity_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.stream.observer_channel_capacity == 0 {
            return Err(AppError::Config(
                "stream.observer_channel_capacity must be greater than zero".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(AppError::Config(
                "model.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        Ok(())
    }
}
