//! Configuration error types.

use thiserror::Error;

/// Configuration error type. All variants are fail-fast at startup, before
/// any connection is opened or signal handler installed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("secret key must be 64 hex characters, got {actual}")]
    InvalidKeyLength { actual: usize },

    #[error("secret key is not valid hex: {0}")]
    InvalidKeyHex(String),

    #[error(
        "health-check interval ({interval_ms}ms) must be >= batch timeout ({timeout_ms}ms)"
    )]
    HealthcheckIntervalTooShort { interval_ms: u64, timeout_ms: u64 },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
