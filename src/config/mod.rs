use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::showtime::BoundaryRule;

// Top-level configuration, one nested struct per concern
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub booking: BookingConfig,
    pub payment: PaymentConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub rust_log: String,
    pub log_format: LogFormat,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `None` runs the service on the in-memory store.
    pub url: Option<String>,
    pub pool_size: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// `None` keeps seat leases in-process.
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub seat_lock_ttl: Duration,
    pub seat_lock_wait: Duration,
    pub tx_timeout: Duration,
    pub showtime_boundary: BoundaryRule,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub server_key: String,
    pub gateway_url: String,
    pub timeout: Duration,
    pub require_signature: bool,
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value:?} for {name}: {reason}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
    pub reason: String,
}

/// Source of raw settings. The process environment in production, a map in
/// tests.
pub trait Vars {
    fn get(&self, name: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl Vars for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

impl<F> Vars for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        self(name)
    }
}

fn parsed<T, V>(vars: &V, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Vars + ?Sized,
{
    match vars.get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
            name,
            value,
            reason: e.to_string(),
        }),
    }
}

fn secs<V: Vars + ?Sized>(vars: &V, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parsed(vars, name, default).map(Duration::from_secs)
}

fn millis<V: Vars + ?Sized>(vars: &V, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    parsed(vars, name, default).map(Duration::from_millis)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&ProcessEnv)
    }

    pub fn from_vars<V: Vars + ?Sized>(vars: &V) -> Result<Self, ConfigError> {
        Ok(Config {
            app: AppConfig {
                host: vars.get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed(vars, "PORT", 8000)?,
                rust_log: vars
                    .get("RUST_LOG")
                    .unwrap_or_else(|| "cinema_booking=debug,tower_http=debug".to_string()),
                log_format: parsed(vars, "LOG_FORMAT", LogFormat::Text)?,
                request_timeout: secs(vars, "REQUEST_TIMEOUT_SECS", 15)?,
            },
            database: DatabaseConfig {
                url: vars.get("DATABASE_URL"),
                pool_size: parsed(vars, "DB_POOL_SIZE", 20)?,
                acquire_timeout: secs(vars, "DB_ACQUIRE_TIMEOUT_SECS", 5)?,
            },
            redis: RedisConfig {
                url: vars.get("REDIS_URL"),
            },
            booking: BookingConfig {
                seat_lock_ttl: millis(vars, "SEAT_LOCK_TTL_MS", 5000)?,
                seat_lock_wait: millis(vars, "SEAT_LOCK_WAIT_MS", 2000)?,
                tx_timeout: secs(vars, "TX_TIMEOUT_SECS", 10)?,
                showtime_boundary: parsed(vars, "SHOWTIME_BOUNDARY", BoundaryRule::HalfOpen)?,
            },
            payment: PaymentConfig {
                server_key: vars.get("PAYMENT_SERVER_KEY").unwrap_or_default(),
                gateway_url: vars
                    .get("PAYMENT_GATEWAY_URL")
                    .unwrap_or_else(|| "https://app.sandbox.midtrans.com".to_string()),
                timeout: secs(vars, "PAYMENT_TIMEOUT_SECS", 10)?,
                require_signature: parsed(vars, "PAYMENT_REQUIRE_SIGNATURE", false)?,
                circuit_breaker: CircuitBreakerConfig {
                    failure_threshold: parsed(vars, "CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
                    cool_down: secs(vars, "CIRCUIT_BREAKER_TIMEOUT_SECONDS", 60)?,
                },
            },
        })
    }
}
