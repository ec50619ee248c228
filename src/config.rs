use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineSettings;
use crate::model::CancellationPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is not valid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Daemon settings, read from `STAYKEEP_*` variables (a `.env` file is honoured).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub payment_url: String,
    pub refund_url: String,
    pub default_refund_percentage: f64,
    pub default_cancellation_days: i64,
    pub grace_period_days: i64,
    pub gateway_timeout: Duration,
    pub sweep_interval: Duration,
    /// Journal appends after which the compactor rewrites the WAL.
    pub compact_threshold: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is fine.
        _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = Self {
            data_dir: lookup("STAYKEEP_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            metrics_port: parse_opt(&lookup, "STAYKEEP_METRICS_PORT")?,
            payment_url: lookup("STAYKEEP_PAYMENT_URL").unwrap_or_else(|| "http://localhost:8083/payment".into()),
            refund_url: lookup("STAYKEEP_REFUND_URL").unwrap_or_else(|| "http://localhost:8083/refund".into()),
            default_refund_percentage: parse_or(&lookup, "STAYKEEP_DEFAULT_REFUND_PERCENTAGE", 50.0)?,
            default_cancellation_days: parse_or(&lookup, "STAYKEEP_DEFAULT_CANCELLATION_DAYS", 5)?,
            grace_period_days: parse_or(&lookup, "STAYKEEP_GRACE_PERIOD_DAYS", 3)?,
            gateway_timeout: Duration::from_secs(parse_or(&lookup, "STAYKEEP_GATEWAY_TIMEOUT_SECS", 10)?),
            sweep_interval: Duration::from_secs(parse_or(&lookup, "STAYKEEP_SWEEP_INTERVAL_SECS", 86_400)?),
            compact_threshold: parse_or(&lookup, "STAYKEEP_COMPACT_THRESHOLD", 1000)?,
        };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, value: String, reason: &str| ConfigError::Invalid {
            key,
            value,
            reason: reason.to_string(),
        };
        if !(0.0..=100.0).contains(&self.default_refund_percentage) {
            return Err(invalid(
                "STAYKEEP_DEFAULT_REFUND_PERCENTAGE",
                self.default_refund_percentage.to_string(),
                "must be between 0 and 100",
            ));
        }
        if self.default_cancellation_days < 0 {
            return Err(invalid(
                "STAYKEEP_DEFAULT_CANCELLATION_DAYS",
                self.default_cancellation_days.to_string(),
                "must not be negative",
            ));
        }
        if self.grace_period_days < 0 {
            return Err(invalid(
                "STAYKEEP_GRACE_PERIOD_DAYS",
                self.grace_period_days.to_string(),
                "must not be negative",
            ));
        }
        if self.gateway_timeout.is_zero() {
            return Err(invalid("STAYKEEP_GATEWAY_TIMEOUT_SECS", "0".into(), "must be positive"));
        }
        if self.sweep_interval.is_zero() {
            return Err(invalid("STAYKEEP_SWEEP_INTERVAL_SECS", "0".into(), "must be positive"));
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_policy: CancellationPolicy {
                window_days: self.default_cancellation_days,
                refund_percentage: self.default_refund_percentage,
            },
            grace_period_days: self.grace_period_days,
            gateway_timeout: self.gateway_timeout,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("staykeep.wal")
    }
}

fn parse_opt<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else { return Ok(None) };
    raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}
