//! Logging setup for binaries and test harnesses.
//!
//! Library code only emits `tracing` events; a binary calls
//! [`init_logging`] once to install a subscriber.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use crate::config::ConfigError;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!("unknown log format: {other}"))),
        }
    }
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Returns an error if a
/// global subscriber is already installed.
pub fn init_logging(
    level: &str,
    format: LogFormat,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match format {
        LogFormat::Json => subscriber
            .json()
            .with_timer(tracing_subscriber::fmt::time::uptime())
            .try_init(),
        LogFormat::Compact => subscriber.compact().try_init(),
        LogFormat::Pretty => subscriber.pretty().try_init(),
    }
}
