use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use password_hash::rand_core::{OsRng, RngCore};
use thiserror::Error;
use tracing::{info, warn};

use crate::credentials::DEFAULT_LOG_N;

const SECRETS_DIR: &str = "/run/secrets";
const MIN_SECRET_LEN: usize = 32;
const MAX_SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("expected redis or memory, got {0}")]
pub struct UnknownStorage(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Redis,
    Memory,
}

impl FromStr for StorageKind {
    type Err = UnknownStorage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StorageKind::Redis),
            "memory" => Ok(StorageKind::Memory),
            other => Err(UnknownStorage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub storage: StorageKind,
    pub redis_url: String,
    pub meili_url: String,
    pub meili_key: Option<String>,
    pub session_secret: Vec<u8>,
    pub session_ttl_secs: i64,
    pub scrypt_log_n: u8,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let session_secret = match read_secret("SESSION_SECRET") {
            Some(secret) => {
                if secret.len() < MIN_SECRET_LEN {
                    warn!("SESSION_SECRET is shorter than {MIN_SECRET_LEN} bytes");
                }
                secret.into_bytes()
            }
            None => {
                warn!("SESSION_SECRET not set, sessions will not survive a restart");
                random_secret()
            }
        };

        let session_ttl_secs = check_session_ttl(try_load("SESSION_TTL_SECS", "3600")?)?;

        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            storage: try_load("STORAGE", "redis")?,
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379")?,
            meili_url: try_load("MEILI_URL", "http://127.0.0.1:7700")?,
            meili_key: read_secret("MEILI_ADMIN_KEY"),
            session_secret,
            session_ttl_secs,
            scrypt_log_n: try_load("SCRYPT_LOG_N", &DEFAULT_LOG_N.to_string())?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1111,
            storage: StorageKind::Memory,
            redis_url: "redis://127.0.0.1:6379".into(),
            meili_url: "http://127.0.0.1:7700".into(),
            meili_key: None,
            session_secret: random_secret(),
            session_ttl_secs: 3600,
            scrypt_log_n: DEFAULT_LOG_N,
        }
    }
}

/// At most thirty days.
fn check_session_ttl(ttl_secs: i64) -> Result<i64, ConfigError> {
    if (1..=MAX_SESSION_TTL_SECS).contains(&ttl_secs) {
        return Ok(ttl_secs);
    }

    Err(ConfigError::Invalid {
        key: "SESSION_TTL_SECS",
        value: ttl_secs.to_string(),
        reason: format!("must be between 1 and {MAX_SESSION_TTL_SECS}"),
    })
}

fn random_secret() -> Vec<u8> {
    let mut secret = vec![0u8; MIN_SECRET_LEN];
    OsRng.fill_bytes(&mut secret);
    secret
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }
    })
}

/// Docker secret first, then the plain environment variable.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("{SECRETS_DIR}/{secret_name}");

    match read_to_string(&path) {
        Ok(s) => Some(s.trim().to_string()),
        Err(e) => {
            info!("Secret {secret_name} not readable from file ({e}), trying environment");
            env::var(secret_name)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        }
    }
}
