use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ArbError, Result};
use crate::poller::PollerConfig;

const DEFAULT_ODDS_API_BASE_URL: &str = "https://api.sportsdata.io/v3/nba/odds/json";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub odds_api_base_url: String,
    pub total_stake: Decimal,
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub lookback_hours: i64,
    pub lookahead_hours: i64,
    pub scan_concurrency: usize,
    pub subscriber_buffer: usize,
    pub bind_addr: String,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            odds_api_base_url: DEFAULT_ODDS_API_BASE_URL.to_string(),
            total_stake: dec!(20),
            poll_interval: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
            lookback_hours: 4,
            lookahead_hours: 24,
            scan_concurrency: 4,
            subscriber_buffer: 16,
            bind_addr: "0.0.0.0:8080".to_string(),
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Reads the process environment. Call `dotenv()` first to pick up a
    /// `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let config = Config {
            api_key: lookup("SPORTSDATA_API_KEY").unwrap_or_default(),
            odds_api_base_url: lookup("ODDS_API_BASE_URL").unwrap_or(defaults.odds_api_base_url),
            total_stake: parse(&lookup, "TOTAL_STAKE", defaults.total_stake)?,
            poll_interval: Duration::from_secs(parse(&lookup, "POLL_INTERVAL_SECS", 30)?),
            retry_backoff: Duration::from_secs(parse(&lookup, "RETRY_BACKOFF_SECS", 5)?),
            lookback_hours: parse(&lookup, "LOOKBACK_HOURS", defaults.lookback_hours)?,
            lookahead_hours: parse(&lookup, "LOOKAHEAD_HOURS", defaults.lookahead_hours)?,
            scan_concurrency: parse(&lookup, "SCAN_CONCURRENCY", defaults.scan_concurrency)?,
            subscriber_buffer: parse(&lookup, "SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?,
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            http_timeout: Duration::from_secs(parse(&lookup, "HTTP_TIMEOUT_SECS", 10)?),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.total_stake <= Decimal::ZERO {
            return Err(ArbError::Config("TOTAL_STAKE must be positive".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(ArbError::Config("POLL_INTERVAL_SECS must be positive".to_string()));
        }
        if self.retry_backoff >= self.poll_interval {
            return Err(ArbError::Config(
                "RETRY_BACKOFF_SECS must be shorter than POLL_INTERVAL_SECS".to_string(),
            ));
        }
        if self.lookback_hours < 0 || self.lookahead_hours < 0 {
            return Err(ArbError::Config("lookback/lookahead hours cannot be negative".to_string()));
        }
        if self.scan_concurrency == 0 || self.subscriber_buffer == 0 {
            return Err(ArbError::Config(
                "SCAN_CONCURRENCY and SUBSCRIBER_BUFFER must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            retry_backoff: self.retry_backoff,
            lookback: chrono::Duration::hours(self.lookback_hours),
            lookahead: chrono::Duration::hours(self.lookahead_hours),
            concurrency: self.scan_concurrency,
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ArbError::Config(format!("{}={:?}: {}", key, raw, e))),
        _ => Ok(default),
    }
}
