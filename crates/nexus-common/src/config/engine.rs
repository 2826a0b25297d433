//! Engine configuration structures.
//!
//! These structures define how runner plans are built and which execution
//! mode they serve.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NexusError, NexusResult};

/// Execution mode of a compiled plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Offline evaluation over whole stored tables.
    #[default]
    Batch,
    /// Online evaluation of one request row joined with stored history.
    Request,
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Batch => write!(f, "batch"),
            Self::Request => write!(f, "request"),
        }
    }
}

/// Runner engine configuration.
///
/// # Example
///
/// ```rust
/// use nexus_common::config::{EngineConfig, EngineMode};
///
/// let config = EngineConfig::builder().mode(EngineMode::Request).build();
/// assert_eq!(config.mode, EngineMode::Request);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Execution mode of plans built with this configuration.
    #[serde(default)]
    pub mode: EngineMode,

    /// Database used when a plan node names no database.
    #[serde(default = "default_database")]
    pub default_database: String,

    /// Allow two windows over the same partition to share one scan.
    #[serde(default = "default_true")]
    pub enable_window_merge: bool,

    /// Allow merging windows that declare different max sizes.
    #[serde(default)]
    pub enable_maxsize_merge: bool,

    /// Reject plans whose windows cannot be served from an index.
    #[serde(default)]
    pub performance_sensitive: bool,

    /// Upper bound on runners in one plan.
    #[serde(default = "default_max_runners")]
    pub max_runners: usize,
}

fn default_database() -> String {
    "db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_runners() -> usize {
    4096
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::default(),
            default_database: default_database(),
            enable_window_merge: default_true(),
            enable_maxsize_merge: false,
            performance_sensitive: false,
            max_runners: default_max_runners(),
        }
    }
}

impl EngineConfig {
    /// Creates a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request-mode configuration.
    #[must_use]
    pub fn request() -> Self {
        Self {
            mode: EngineMode::Request,
            ..Self::default()
        }
    }

    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> NexusResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> NexusResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| NexusError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> NexusResult<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to TOML string.
    pub fn to_toml(&self) -> NexusResult<String> {
        toml::to_string_pretty(self).map_err(|e| NexusError::InvalidConfig {
            message: e.to_string(),
        })
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> NexusResult<()> {
        if self.default_database.is_empty() {
            return Err(NexusError::InvalidConfig {
                message: "default_database must not be empty".to_string(),
            });
        }
        if self.max_runners == 0 {
            return Err(NexusError::InvalidConfig {
                message: "max_runners must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Returns true when plans run against a single request row.
    #[must_use]
    pub const fn is_request_mode(&self) -> bool {
        matches!(self.mode, EngineMode::Request)
    }

    /// Creates a builder for configuration.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

/// Builder for engine configuration.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn mode(mut self, mode: EngineMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Sets the default database.
    #[must_use]
    pub fn default_database(mut self, db: impl Into<String>) -> Self {
        self.config.default_database = db.into();
        self
    }

    /// Enables or disables window merging.
    #[must_use]
    pub fn window_merge(mut self, enabled: bool) -> Self {
        self.config.enable_window_merge = enabled;
        self
    }

    /// Enables or disables merging windows with different max sizes.
    #[must_use]
    pub fn maxsize_merge(mut self, enabled: bool) -> Self {
        self.config.enable_maxsize_merge = enabled;
        self
    }

    /// Marks plans as performance sensitive.
    #[must_use]
    pub fn performance_sensitive(mut self, enabled: bool) -> Self {
        self.config.performance_sensitive = enabled;
        self
    }

    /// Sets the runner limit.
    #[must_use]
    pub fn max_runners(mut self, max: usize) -> Self {
        self.config.max_runners = max;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
