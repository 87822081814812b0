//! Runtime configuration.
//!
//! Values come from the process environment (optionally seeded from a
//! `.env` file by `dotenvy` in `main`), falling back to the defaults below.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

const DEFAULT_JWT_SECRET: &str = "ecocollect-dev-secret";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Sled directory; ignored when `temporary` is set
    pub data_path: PathBuf,
    pub temporary: bool,
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    /// Probability in [0,1] that a login attempt fails with a simulated error
    pub login_failure_rate: f64,
    pub register_failure_rate: f64,
    /// Share added on top of picker payouts when computing revenue
    pub platform_margin: f64,
    pub log_json: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 11111)),
            data_path: PathBuf::from("ecocollect_data"),
            temporary: false,
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_ttl_secs: 3600,
            login_failure_rate: 0.0,
            register_failure_rate: 0.0,
            platform_margin: 0.25,
            log_json: false,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup (the environment in production,
    /// a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let config = Config {
            bind_addr: parse_or(&lookup, "ECOCOLLECT_BIND", defaults.bind_addr)?,
            data_path: lookup("ECOCOLLECT_DATA")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_path),
            temporary: parse_or(&lookup, "ECOCOLLECT_TEMPORARY", defaults.temporary)?,
            jwt_secret: lookup("ECOCOLLECT_JWT_SECRET").unwrap_or(defaults.jwt_secret),
            token_ttl_secs: parse_or(&lookup, "ECOCOLLECT_TOKEN_TTL_SECS", defaults.token_ttl_secs)?,
            login_failure_rate: parse_or(
                &lookup,
                "ECOCOLLECT_LOGIN_FAILURE_RATE",
                defaults.login_failure_rate,
            )?,
            register_failure_rate: parse_or(
                &lookup,
                "ECOCOLLECT_REGISTER_FAILURE_RATE",
                defaults.register_failure_rate,
            )?,
            platform_margin: parse_or(&lookup, "ECOCOLLECT_PLATFORM_MARGIN", defaults.platform_margin)?,
            log_json: parse_or(&lookup, "ECOCOLLECT_LOG_JSON", defaults.log_json)?,
            log_dir: lookup("ECOCOLLECT_LOG_DIR").map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("ECOCOLLECT_LOGIN_FAILURE_RATE", self.login_failure_rate),
            ("ECOCOLLECT_REGISTER_FAILURE_RATE", self.register_failure_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::Config(format!("{name} must be within [0, 1], got {rate}")));
            }
        }
        if self.platform_margin < 0.0 || !self.platform_margin.is_finite() {
            return Err(Error::Config("ECOCOLLECT_PLATFORM_MARGIN must be >= 0".to_string()));
        }
        if self.token_ttl_secs == 0 {
            return Err(Error::Config("ECOCOLLECT_TOKEN_TTL_SECS must be > 0".to_string()));
        }
        if self.jwt_secret.is_empty() {
            return Err(Error::Config("ECOCOLLECT_JWT_SECRET must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}
