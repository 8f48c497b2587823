//! Configuration management for the identity store
//!
//! Loads settings from environment variables, with a `.env` file honoured in
//! debug builds.

use anyhow::{bail, Context, Result};
use db_pool::DbConfig;
use std::env;
use std::time::Duration;
use tracing::info;

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub database: DbConfig,
    pub lockout: LockoutSettings,
    pub keys: KeySettings,
    /// Upper bound on every store operation
    pub operation_timeout: Duration,
}

impl Settings {
    pub fn load() -> Result<Self> {
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        let database = DbConfig::from_env("identity-store")
            .map_err(anyhow::Error::msg)
            .context("Invalid database configuration")?;

        Ok(Settings {
            database,
            lockout: LockoutSettings::from_env()?,
            keys: KeySettings::from_env()?,
            operation_timeout: Duration::from_millis(parse_var("OPERATION_TIMEOUT_MS", 5000)?),
        })
    }
}

/// Failed-attempt policy and one-time secret sizing
#[derive(Debug, Clone)]
pub struct LockoutSettings {
    pub max_invalid_attempts: u32,
    pub invalid_attempt_window: Duration,
    pub totp_secret_length: usize,
    pub user_otp_ttl: Duration,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            max_invalid_attempts: 5,
            invalid_attempt_window: Duration::from_secs(15 * 60),
            totp_secret_length: 20,
            user_otp_ttl: Duration::from_secs(10 * 60),
        }
    }
}

impl LockoutSettings {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let totp_secret_length = parse_var("TOTP_SECRET_LENGTH", defaults.totp_secret_length)?;
        if totp_secret_length == 0 {
            bail!("TOTP_SECRET_LENGTH must be at least 1");
        }

        Ok(Self {
            max_invalid_attempts: parse_var("MAX_INVALID_ATTEMPTS", defaults.max_invalid_attempts)?,
            invalid_attempt_window: Duration::from_secs(parse_var(
                "INVALID_ATTEMPT_WINDOW_SECS",
                defaults.invalid_attempt_window.as_secs(),
            )?),
            totp_secret_length,
            user_otp_ttl: Duration::from_secs(parse_var(
                "USER_OTP_TTL_SECS",
                defaults.user_otp_ttl.as_secs(),
            )?),
        })
    }
}

/// Signing key rotation settings
#[derive(Debug, Clone, Default)]
pub struct KeySettings {
    /// How long retired keys stay valid after a rotation; zero retires them at once
    pub rotation_overlap: Duration,
    /// Channels the bootstrap binary makes sure exist
    pub bootstrap_channels: Vec<ChannelSpec>,
}

impl KeySettings {
    fn from_env() -> Result<Self> {
        let bootstrap_channels = match env::var("BOOTSTRAP_CHANNELS") {
            Ok(raw) => parse_channel_specs(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            rotation_overlap: Duration::from_secs(parse_var("KEY_ROTATION_OVERLAP_SECS", 0)?),
            bootstrap_channels,
        })
    }
}

/// `name:ALGORITHM:use:days`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub algorithm: String,
    pub key_use: String,
    pub validity_days: u32,
}

/// Parse a comma separated list of `name:ALGORITHM:use:days` entries
pub fn parse_channel_specs(raw: &str) -> Result<Vec<ChannelSpec>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let [name, algorithm, key_use, days] = parts.as_slice() else {
                bail!("Invalid channel spec {:?}, expected name:ALGORITHM:use:days", entry);
            };
            if name.is_empty() || algorithm.is_empty() || key_use.is_empty() {
                bail!("Invalid channel spec {:?}, empty field", entry);
            }
            let validity_days = days
                .parse()
                .with_context(|| format!("Invalid validity days in channel spec {:?}", entry))?;
            Ok(ChannelSpec {
                name: name.to_string(),
                algorithm: algorithm.to_string(),
                key_use: key_use.to_string(),
                validity_days,
            })
        })
        .collect()
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    db_pool::parse_env_or_err(key, default).map_err(anyhow::Error::msg)
}
