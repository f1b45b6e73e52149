//! Status type returned by accelerator lifecycle calls.
//!
//! Every `init` / `reshape` / `forward` call reports failure through
//! [`AccError`]; nothing is retried or downgraded at this layer.

/// Result alias for accelerator operations.
pub type AccResult<T> = Result<T, AccError>;

/// Errors reported by accelerator lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccError {
    /// Layer parameters are missing, malformed or of the wrong kind.
    #[error("configuration error: {0}")]
    Config(String),

    /// The device could not compile or link the requested kernel.
    #[error("failed to build kernel '{kernel}' from program '{program}': {reason}")]
    BuildFailure {
        program: String,
        kernel: String,
        reason: String,
    },

    /// The device could not allocate an image surface.
    #[error("failed to allocate {width}x{height} image: {reason}")]
    Allocation {
        width: u32,
        height: u32,
        reason: String,
    },

    /// Lifecycle state that must exist after a successful init is missing.
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    /// A lifecycle call arrived before the state it depends on was built.
    #[error("accelerator not ready: {0}")]
    NotReady(&'static str),
}

impl AccError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Stable numeric status code, suitable for FFI or log correlation.
    pub const fn code(&self) -> u32 {
        match self {
            Self::Config(_) => 0x1002,
            Self::BuildFailure { .. } => 0x3001,
            Self::Allocation { .. } => 0x3002,
            Self::InternalConsistency(_) => 0x3003,
            Self::NotReady(_) => 0x3004,
        }
    }
}

impl From<crate::config::ConfigError> for AccError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
