use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::sync_engine::{AdmissionPolicy, RetryPolicy};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },

    #[error("{key}={value:?} is not valid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub struct Config {
    /// Postgres url. Required unless running dry.
    pub db_url: Option<String>,
    pub source_api_url: String,
    pub source_api_key: Option<String>,
    pub source_rps_limit: u32,
    /// Bearer token for the HTTP triggers. Triggers reject every call when unset.
    pub cron_secret: Option<String>,
    pub stock_symbols: Vec<String>,
    pub min_request_delay: Duration,
    pub max_concurrent_requests: usize,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub slack_webhook_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub run_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let config = Self {
            db_url: get("DATABASE_URL"),
            source_api_url: get("SOURCE_API_URL")
                .unwrap_or_else(|| "http://localhost:9000".to_string()),
            source_api_key: get("SOURCE_API_KEY"),
            source_rps_limit: parse_or(&get, "SOURCE_RPS_LIMIT", 10)?,
            cron_secret: get("CRON_SECRET"),
            stock_symbols: get("STOCK_SYMBOLS")
                .map(|raw| parse_symbol_list(&raw))
                .unwrap_or_default(),
            min_request_delay: Duration::from_millis(parse_or(&get, "MIN_REQUEST_DELAY_MS", 200)?),
            max_concurrent_requests: parse_or(&get, "MAX_CONCURRENT_REQUESTS", 3)?,
            max_retries: parse_or(&get, "MAX_RETRIES", 3)?,
            initial_retry_delay: Duration::from_millis(parse_or(
                &get,
                "INITIAL_RETRY_DELAY_MS",
                1_000,
            )?),
            max_retry_delay: Duration::from_millis(parse_or(&get, "MAX_RETRY_DELAY_MS", 10_000)?),
            slack_webhook_url: get("SLACK_WEBHOOK_URL"),
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            run_timeout: get("RUN_TIMEOUT_SECS")
                .map(|raw| parse_value::<u64>("RUN_TIMEOUT_SECS", &raw))
                .transpose()?
                .map(Duration::from_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONCURRENT_REQUESTS",
                value: "0".to_string(),
                reason: "at least one request must be allowed".to_string(),
            });
        }
        if self.max_retry_delay < self.initial_retry_delay {
            return Err(ConfigError::Invalid {
                key: "MAX_RETRY_DELAY_MS",
                value: self.max_retry_delay.as_millis().to_string(),
                reason: format!(
                    "must be >= INITIAL_RETRY_DELAY_MS ({})",
                    self.initial_retry_delay.as_millis()
                ),
            });
        }
        Ok(())
    }

    pub fn require_db_url(&self) -> Result<&str, ConfigError> {
        self.db_url
            .as_deref()
            .ok_or(ConfigError::Missing { key: "DATABASE_URL" })
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy {
            max_concurrent: self.max_concurrent_requests,
            min_interval: self.min_request_delay,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_retry_delay,
            max_delay: self.max_retry_delay,
        }
    }
}

/// `STOCK_SYMBOLS` format: comma separated, trimmed, upper-cased, blanks dropped.
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|symbol| symbol.trim().to_uppercase())
        .filter(|symbol| !symbol.is_empty())
        .collect()
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: err.to_string(),
    })
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}
