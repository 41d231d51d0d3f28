//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use contracts::SkuId;
use saga::{RetryPolicy, SagaConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default: `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default: `info`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `RESERVATION_TIMEOUT_MS`, `PENDING_DEADLINE_MS`, `MAX_RESERVATION_ATTEMPTS`
/// - `COMPENSATION_MAX_ATTEMPTS`, `COMPENSATION_INITIAL_BACKOFF_MS`,
///   `COMPENSATION_MAX_BACKOFF_MS`
/// - `TIMEOUT_SWEEP_INTERVAL_MS`, `ROUTER_SHARDS`
/// - `SEED_STOCK`: catalog seeded at startup, as `SKU=qty,SKU=qty`
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub reservation_timeout: Duration,
    pub pending_deadline: Duration,
    pub max_reservation_attempts: u32,
    pub compensation_max_attempts: u32,
    pub compensation_initial_backoff: Duration,
    pub compensation_max_backoff: Duration,
    pub timeout_sweep_interval: Duration,
    pub router_shards: usize,
    pub seed_stock: Vec<(SkuId, u32)>,
}

const DEFAULT_SEED_STOCK: &str = "IPHONE17=10,IPHONE17_SOLDOUT=0";

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let millis = |key: &str, default: Duration| {
            parsed(key).map(Duration::from_millis).unwrap_or(default)
        };

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.log_format),
            reservation_timeout: millis("RESERVATION_TIMEOUT_MS", defaults.reservation_timeout),
            pending_deadline: millis("PENDING_DEADLINE_MS", defaults.pending_deadline),
            max_reservation_attempts: parsed("MAX_RESERVATION_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.max_reservation_attempts),
            compensation_max_attempts: parsed("COMPENSATION_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.compensation_max_attempts),
            compensation_initial_backoff: millis(
                "COMPENSATION_INITIAL_BACKOFF_MS",
                defaults.compensation_initial_backoff,
            ),
            compensation_max_backoff: millis(
                "COMPENSATION_MAX_BACKOFF_MS",
                defaults.compensation_max_backoff,
            ),
            timeout_sweep_interval: millis(
                "TIMEOUT_SWEEP_INTERVAL_MS",
                defaults.timeout_sweep_interval,
            ),
            router_shards: parsed("ROUTER_SHARDS")
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.router_shards),
            seed_stock: lookup("SEED_STOCK")
                .and_then(|s| parse_seed_stock(&s))
                .unwrap_or(defaults.seed_stock),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn saga_config(&self) -> SagaConfig {
        SagaConfig {
            reservation_timeout: self.reservation_timeout,
            pending_deadline: self.pending_deadline,
            max_reservation_attempts: self.max_reservation_attempts,
            compensation_retry: RetryPolicy::builder()
                .max_attempts(self.compensation_max_attempts)
                .initial_backoff(self.compensation_initial_backoff)
                .max_backoff(self.compensation_max_backoff)
                .build(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let saga = SagaConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            reservation_timeout: saga.reservation_timeout,
            pending_deadline: saga.pending_deadline,
            max_reservation_attempts: saga.max_reservation_attempts,
            compensation_max_attempts: saga.compensation_retry.max_attempts,
            compensation_initial_backoff: saga.compensation_retry.initial_backoff,
            compensation_max_backoff: saga.compensation_retry.max_backoff,
            timeout_sweep_interval: Duration::from_millis(1000),
            router_shards: 4,
            seed_stock: parse_seed_stock(DEFAULT_SEED_STOCK).unwrap_or_default(),
        }
    }
}

/// Parses `SKU=qty,SKU=qty`. Returns None if any entry is malformed.
pub fn parse_seed_stock(raw: &str) -> Option<Vec<(SkuId, u32)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (sku, quantity) = entry.split_once('=')?;
            let sku = sku.trim();
            if sku.is_empty() {
                return None;
            }
            Some((SkuId::new(sku), quantity.trim().parse().ok()?))
        })
        .collect()
}
