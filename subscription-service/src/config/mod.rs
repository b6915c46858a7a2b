use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub renewal: RenewalConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// One year; the same bound the renewal endpoint applies to `window_hours`.
pub const MAX_RENEWAL_WINDOW_HOURS: i64 = 8760;

#[derive(Debug, Clone, Deserialize)]
pub struct RenewalConfig {
    /// How far ahead of `end_date` a subscription becomes eligible.
    pub window_hours: i64,
    /// Scheduler period; 0 disables the in-process scheduler.
    pub interval_secs: u64,
}

impl RenewalConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.window_hours)
    }

    pub fn scheduler_interval(&self) -> Option<std::time::Duration> {
        (self.interval_secs > 0).then(|| std::time::Duration::from_secs(self.interval_secs))
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            interval_secs: 0,
        }
    }
}

impl SubscriptionConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let config = SubscriptionConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("subscription-service"))?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")))?,
            log_level: get_env("LOG_LEVEL", Some("info"))?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "2")?,
            },
            renewal: RenewalConfig {
                window_hours: parse_env("RENEWAL_WINDOW_HOURS", "24")?,
                interval_secs: parse_env("RENEWAL_INTERVAL_SECS", "0")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS must not exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        if !(1..=MAX_RENEWAL_WINDOW_HOURS).contains(&self.renewal.window_hours) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RENEWAL_WINDOW_HOURS must be between 1 and {}",
                MAX_RENEWAL_WINDOW_HOURS
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => default.map(str::to_string).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!("{} is required but not set", key))
        }),
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default))?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}
