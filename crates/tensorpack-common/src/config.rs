//! Reduction accelerator configuration with TOML, environment variable and
//! default sources.

use std::path::Path;
use std::{env, fmt, fs};

use serde::{Deserialize, Serialize};

// ── Errors ──────────────────────────────────────────────────────────

/// Errors produced by configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown precision: {0}")]
    UnknownPrecision(String),

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid environment variable value for {key}: {value}")]
    InvalidEnvVar { key: String, value: String },
}

// ── Precision ───────────────────────────────────────────────────────

/// Numeric precision the device runtime computes in.
///
/// Only `High` stores full 32-bit floats in images and local memory; the
/// other modes use 16-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    High,
    #[default]
    Normal,
    Low,
}

impl Precision {
    /// Bytes per scalar element stored on the device.
    pub const fn element_bytes(self) -> u32 {
        match self {
            Self::High => 4,
            Self::Normal | Self::Low => 2,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Precision {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(ConfigError::UnknownPrecision(other.to_string())),
        }
    }
}

// ── LogLevel ────────────────────────────────────────────────────────

/// Log verbosity for the accelerator subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }
}

// ── TOML wrapper ────────────────────────────────────────────────────

/// Wrapper used for the `[reduce]` table in TOML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TomlWrapper {
    reduce: ReduceAccelConfig,
}

// ── ReduceAccelConfig ───────────────────────────────────────────────

/// Output-surface occupancy below which the device is considered starved.
pub const DEFAULT_LOW_PARALLELISM_THRESHOLD: u64 = 256;

/// Reduced-axis length at or above which a tree reduction pays off.
pub const DEFAULT_HIGH_INTENSITY_THRESHOLD: u64 = 128;

/// Configuration for the reduction accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceAccelConfig {
    pub precision: Precision,
    pub low_parallelism_threshold: u64,
    pub high_intensity_threshold: u64,
    pub log_level: LogLevel,
}

impl Default for ReduceAccelConfig {
    fn default() -> Self {
        Self {
            precision: Precision::Normal,
            low_parallelism_threshold: DEFAULT_LOW_PARALLELISM_THRESHOLD,
            high_intensity_threshold: DEFAULT_HIGH_INTENSITY_THRESHOLD,
            log_level: LogLevel::Warn,
        }
    }
}

impl ReduceAccelConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// The file is expected to contain a `[reduce]` table. If the file
    /// does not exist, returns `Ok(Self::default())`.
    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!("config file not found: {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let wrapper: TomlWrapper = toml::from_str(&text)?;
        Ok(wrapper.reduce)
    }

    /// Serialize to a TOML string (wrapped in `[reduce]`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let wrapper = TomlWrapper { reduce: self.clone() };
        Ok(toml::to_string_pretty(&wrapper)?)
    }

    /// Build a config from `TENSORPACK_*` environment variables layered on
    /// top of `Self::default()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env()
    }

    /// Apply `TENSORPACK_*` environment overrides to `self`.
    pub fn merge_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = env::var("TENSORPACK_PRECISION") {
            self.precision = v.parse()?;
        }
        if let Ok(v) = env::var("TENSORPACK_LOW_PARALLELISM") {
            self.low_parallelism_threshold = Self::parse_env_u64("TENSORPACK_LOW_PARALLELISM", &v)?;
        }
        if let Ok(v) = env::var("TENSORPACK_HIGH_INTENSITY") {
            self.high_intensity_threshold = Self::parse_env_u64("TENSORPACK_HIGH_INTENSITY", &v)?;
        }
        if let Ok(v) = env::var("TENSORPACK_LOG_LEVEL") {
            self.log_level = v.parse()?;
        }
        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.low_parallelism_threshold == 0 {
            return Err(ConfigError::Validation(
                "low_parallelism_threshold must be > 0".into(),
            ));
        }
        if self.high_intensity_threshold == 0 {
            return Err(ConfigError::Validation(
                "high_intensity_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }

    fn parse_env_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
        value.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}
