//! Environment configuration for the mailroom batching agent.

use std::time::Duration;

use zeroize::Zeroize;

use crate::error::{ConfigError, ConfigResult};

const DEFAULT_CHANNEL: &str = "token_insert";
const DEFAULT_QUEUE_NAME: &str = "user_action_queue";
const DEFAULT_BATCH_LIMIT: u32 = 10;
const DEFAULT_BATCH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_HEALTHCHECK_INTERVAL_MS: u64 = 270_000;
const DEFAULT_LOG_LEVEL: &str = "info";

const ENV_DATABASE_URL: &str = "MAILROOM_DATABASE_URL";
const ENV_SECRET_KEY: &str = "MAILROOM_SECRET_KEY";
const ENV_CHANNEL: &str = "MAILROOM_CHANNEL";
const ENV_QUEUE_NAME: &str = "MAILROOM_QUEUE_NAME";
const ENV_BATCH_LIMIT: &str = "MAILROOM_BATCH_LIMIT";
const ENV_BATCH_TIMEOUT_MS: &str = "MAILROOM_BATCH_TIMEOUT_MS";
const ENV_HEALTHCHECK_INTERVAL_MS: &str = "MAILROOM_HEALTHCHECK_INTERVAL_MS";
const ENV_LOG_LEVEL: &str = "MAILROOM_LOG_LEVEL";

/// A decoded 32-byte MAC key, zeroized on drop.
///
/// Kept as its own type (rather than a bare `Vec<u8>`) so the config layer
/// never hands out a plain byte slice that could be cloned/logged by
/// accident — the only way to get at the bytes is `expose()`, and the
/// intended caller is `mailroom_crypto::MacSigner::new`, which copies them
/// into its own zeroizing storage immediately.
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Fully validated configuration for one run of the agent.
pub struct AgentConfig {
    pub database_url: String,
    pub secret_key: SecretKey,
    pub channel: String,
    pub queue_name: String,
    pub batch_limit: u32,
    pub batch_timeout: Duration,
    pub healthcheck_interval: Duration,
    pub log_level: String,
}

impl AgentConfig {
    /// Loads configuration from the environment, per spec.md §6.
    ///
    /// Fails fast (no partial side effects) on missing required variables,
    /// a malformed secret key, or a health-check interval shorter than the
    /// batch timeout. Unparseable integers fall back to their defaults
    /// with a warning rather than failing startup.
    pub fn from_env() -> ConfigResult<Self> {
        let database_url = require_env(ENV_DATABASE_URL)?;
        let secret_key = decode_secret_key(&require_env(ENV_SECRET_KEY)?)?;

        let channel = std::env::var(ENV_CHANNEL).unwrap_or_else(|_| DEFAULT_CHANNEL.to_string());
        let queue_name =
            std::env::var(ENV_QUEUE_NAME).unwrap_or_else(|_| DEFAULT_QUEUE_NAME.to_string());

        let batch_limit = parse_or_default(ENV_BATCH_LIMIT, DEFAULT_BATCH_LIMIT);
        let batch_timeout_ms = parse_or_default(ENV_BATCH_TIMEOUT_MS, DEFAULT_BATCH_TIMEOUT_MS);
        let healthcheck_interval_ms =
            parse_or_default(ENV_HEALTHCHECK_INTERVAL_MS, DEFAULT_HEALTHCHECK_INTERVAL_MS);

        if healthcheck_interval_ms < batch_timeout_ms {
            return Err(ConfigError::HealthcheckIntervalTooShort {
                interval_ms: healthcheck_interval_ms,
                timeout_ms: batch_timeout_ms,
            });
        }

        let log_level =
            std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            database_url,
            secret_key,
            channel,
            queue_name,
            batch_limit,
            batch_timeout: Duration::from_millis(batch_timeout_ms),
            healthcheck_interval: Duration::from_millis(healthcheck_interval_ms),
            log_level,
        })
    }
}

fn require_env(name: &str) -> ConfigResult<String> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_string()))
}

fn decode_secret_key(raw: &str) -> ConfigResult<SecretKey> {
    if raw.len() != 64 {
        return Err(ConfigError::InvalidKeyLength { actual: raw.len() });
    }
    let bytes = hex::decode(raw).map_err(|e| ConfigError::InvalidKeyHex(e.to_string()))?;
    Ok(SecretKey(bytes))
}

fn parse_or_default<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, default = %default, "unparseable integer, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that
    // mutate them so they don't race each other under `cargo test`'s
    // default multi-threaded runner.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            ENV_DATABASE_URL,
            ENV_SECRET_KEY,
            ENV_CHANNEL,
            ENV_QUEUE_NAME,
            ENV_BATCH_LIMIT,
            ENV_BATCH_TIMEOUT_MS,
            ENV_HEALTHCHECK_INTERVAL_MS,
            ENV_LOG_LEVEL,
        ] {
            std::env::remove_var(var);
        }
    }

    const VALID_KEY: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    #[test]
    fn missing_database_url_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(ENV_SECRET_KEY, VALID_KEY);
        let err = AgentConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(v) if v == ENV_DATABASE_URL));
        clear_env();
    }

    #[test]
    fn missing_secret_key_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(ENV_DATABASE_URL, "postgres://localhost/test");
        let err = AgentConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(v) if v == ENV_SECRET_KEY));
        clear_env();
    }

    #[test]
    fn short_secret_key_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(ENV_DATABASE_URL, "postgres://localhost/test");
        std::env::set_var(ENV_SECRET_KEY, "deadbeef");
        let err = AgentConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKeyLength { actual: 8 }));
        clear_env();
    }

    #[test]
    fn non_hex_secret_key_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(ENV_DATABASE_URL, "postgres://localhost/test");
        std::env::set_var(
            ENV_SECRET_KEY,
            "zzzzbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
        );
        let err = AgentConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKeyHex(_)));
        clear_env();
    }

    #[test]
    fn healthcheck_shorter_than_timeout_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(ENV_DATABASE_URL, "postgres://localhost/test");
        std::env::set_var(ENV_SECRET_KEY, VALID_KEY);
        std::env::set_var(ENV_BATCH_TIMEOUT_MS, "5000");
        std::env::set_var(ENV_HEALTHCHECK_INTERVAL_MS, "1000");
        let err = AgentConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::HealthcheckIntervalTooShort {
                interval_ms: 1000,
                timeout_ms: 5000
            }
        ));
        clear_env();
    }

    #[test]
    fn defaults_applied_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(ENV_DATABASE_URL, "postgres://localhost/test");
        std::env::set_var(ENV_SECRET_KEY, VALID_KEY);
        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.channel, DEFAULT_CHANNEL);
        assert_eq!(config.queue_name, DEFAULT_QUEUE_NAME);
        assert_eq!(config.batch_limit, DEFAULT_BATCH_LIMIT);
        assert_eq!(
            config.batch_timeout,
            Duration::from_millis(DEFAULT_BATCH_TIMEOUT_MS)
        );
        assert_eq!(
            config.healthcheck_interval,
            Duration::from_millis(DEFAULT_HEALTHCHECK_INTERVAL_MS)
        );
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        clear_env();
    }

    #[test]
    fn unparseable_batch_limit_falls_back_to_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(ENV_DATABASE_URL, "postgres://localhost/test");
        std::env::set_var(ENV_SECRET_KEY, VALID_KEY);
        std::env::set_var(ENV_BATCH_LIMIT, "not-a-number");
        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.batch_limit, DEFAULT_BATCH_LIMIT);
        clear_env();
    }

    #[test]
    fn secret_key_exposes_decoded_bytes() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var(ENV_DATABASE_URL, "postgres://localhost/test");
        std::env::set_var(ENV_SECRET_KEY, VALID_KEY);
        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.secret_key.expose().len(), 32);
        assert_eq!(config.secret_key.expose()[0], 0xde);
        clear_env();
    }
}
