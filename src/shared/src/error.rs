use thiserror::Error;

/// Crate-wide result alias. Every layer returns this instead of ad hoc
/// `Result<T, String>` or `anyhow::Result` so error kinds stay inspectable
/// across crate boundaries.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds the controller can encounter, grouped by origin rather than
/// by crate. Handling policy for each variant is decided by the caller
/// (most tick-path errors are caught and logged, never propagated upward).
#[derive(Debug, Error)]
pub enum Error {
    #[error("metrics source unavailable: {0}")]
    MetricsUnavailable(String),

    #[error("resource source unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("worker did not stop within the shutdown timeout")]
    StopTimedOut,

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("policy '{policy}' failed: {source}")]
    PolicyFailure {
        policy: String,
        source: anyhow::Error,
    },

    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDecode(#[from] toml::de::Error),
}

impl Error {
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Error::ConfigInvalid(msg.into())
    }
}
