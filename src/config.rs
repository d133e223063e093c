//! Environment-backed configuration.
//!
//! [`EtlConfig`] is built once at process start and handed by reference to
//! every component; nothing reads the environment after that.

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.test.fiindo.com/api/v1";
pub const FALLBACK_SPEED_BOOST_URL: &str = "https://api.test.fiindo.com/api/v1/speedboost";
pub const DEFAULT_TARGET_INDUSTRIES: [&str; 3] = [
    "Banks - Diversified",
    "Software - Application",
    "Consumer Electronics",
];

const DEFAULT_FETCH_WORKERS: usize = 5;
const DEFAULT_CALCULATE_WORKERS: usize = 3;
const DEFAULT_TIMEOUT_SECS: f64 = 90.0;
const DEFAULT_BACKOFF_SECS: f64 = 30.0;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Settings for talking to the remote API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    /// First half of the bearer identity
    pub first_name: String,
    /// Second half of the bearer identity
    pub last_name: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retry policy for GET requests
    pub retry: RetryPolicy,
    /// Optional speed boost side call
    pub speed_boost: SpeedBoostConfig,
}

impl ApiConfig {
    /// Creates an API configuration with default timeout, retry and speed boost settings.
    pub fn new(
        base_url: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        ApiConfig {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            speed_boost: SpeedBoostConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_speed_boost(mut self, speed_boost: SpeedBoostConfig) -> Self {
        self.speed_boost = speed_boost;
        self
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}.{}", self.first_name, self.last_name)
    }
}

/// Speed boost side call settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeedBoostConfig {
    pub enabled: bool,
    /// Explicit URL; takes precedence over the one derived from the base URL
    pub url_override: Option<String>,
}

/// Worker pool sizes for the two fan-out phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Concurrent `/general` lookups
    pub fetch_workers: usize,
    /// Concurrent metric calculations
    pub calculate_workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            fetch_workers: DEFAULT_FETCH_WORKERS,
            calculate_workers: DEFAULT_CALCULATE_WORKERS,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub api: ApiConfig,
    pub workers: WorkerConfig,
    /// Industries an instrument must match exactly to be retained
    pub target_industries: BTreeSet<String>,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Directory for timestamped log files
    pub log_dir: PathBuf,
}

impl EtlConfig {
    /// Creates a configuration with default workers, industries and paths.
    pub fn new(api: ApiConfig) -> Self {
        EtlConfig {
            api,
            workers: WorkerConfig::default(),
            target_industries: default_target_industries(),
            database_path: PathBuf::from("fiindo_challenge.db"),
            log_dir: PathBuf::from("logs"),
        }
    }

    /// Loads `.env` (if present) and reads the process environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingVar`] when `FIRST_NAME` or `LAST_NAME` is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first_name = required(&lookup, "FIRST_NAME")?;
        let last_name = required(&lookup, "LAST_NAME")?;
        let base_url = lookup("FIINDO_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let retry = RetryPolicy::new(
            parse_or(&lookup, "FIINDO_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            seconds_or(&lookup, "FIINDO_RETRY_BACKOFF", DEFAULT_BACKOFF_SECS),
            lookup("FIINDO_RETRY_STATUS_CODES")
                .map(|raw| parse_status_codes(&raw))
                .unwrap_or_else(|| RetryPolicy::default().retry_on_status),
        );

        let speed_boost = SpeedBoostConfig {
            enabled: lookup("FIINDO_ENABLE_SPEEDBOOST")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            url_override: lookup("FIINDO_SPEEDBOOST_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        };

        let api = ApiConfig::new(base_url, first_name, last_name)
            .with_timeout(seconds_or(&lookup, "FIINDO_API_TIMEOUT", DEFAULT_TIMEOUT_SECS))
            .with_retry(retry)
            .with_speed_boost(speed_boost);

        let mut config = EtlConfig::new(api);
        config.workers = WorkerConfig {
            fetch_workers: positive_or(&lookup, "MAX_FETCH_WORKERS", DEFAULT_FETCH_WORKERS),
            calculate_workers: positive_or(&lookup, "MAX_WORKERS", DEFAULT_CALCULATE_WORKERS),
        };
        if let Some(path) = lookup("DATABASE_PATH").filter(|v| !v.trim().is_empty()) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("LOG_DIR").filter(|v| !v.trim().is_empty()) {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("TARGET_INDUSTRIES") {
            let industries: BTreeSet<String> = raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !industries.is_empty() {
                config.target_industries = industries;
            }
        }

        Ok(config)
    }
}

/// The three industries the pipeline tracks by default.
pub fn default_target_industries() -> BTreeSet<String> {
    DEFAULT_TARGET_INDUSTRIES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingVar(key))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Non-positive or unparseable values fall back to the default.
fn positive_or<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).and_then(|v| v.trim().parse::<i64>().ok()) {
        Some(value) if value > 0 => value as usize,
        _ => default,
    }
}

fn seconds_or<F>(lookup: &F, key: &str, default: f64) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|v| Duration::try_from_secs_f64(v).ok())
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}

fn parse_status_codes(raw: &str) -> BTreeSet<u16> {
    raw.split(',')
        .filter_map(|code| code.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_identity_only() {
        let config =
            EtlConfig::from_lookup(lookup_from(&[("FIRST_NAME", "Jane"), ("LAST_NAME", "Doe")]))
                .unwrap();

        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.api.authorization(), "Bearer Jane.Doe");
        assert_eq!(config.api.timeout, Duration::from_secs(90));
        assert_eq!(config.api.retry.max_retries, 3);
        assert_eq!(config.api.retry.backoff, Duration::from_secs(30));
        assert_eq!(config.api.retry.retry_on_status, BTreeSet::from([429, 500]));
        assert!(!config.api.speed_boost.enabled);
        assert_eq!(config.workers, WorkerConfig::default());
        assert_eq!(config.target_industries.len(), 3);
        assert!(config.target_industries.contains("Consumer Electronics"));
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        let err = EtlConfig::from_lookup(lookup_from(&[("FIRST_NAME", "Jane")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("LAST_NAME")));

        let err =
            EtlConfig::from_lookup(lookup_from(&[("FIRST_NAME", "  "), ("LAST_NAME", "Doe")]))
                .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("FIRST_NAME")));
    }

    #[test]
    fn test_overrides() {
        let config = EtlConfig::from_lookup(lookup_from(&[
            ("FIRST_NAME", "Jane"),
            ("LAST_NAME", "Doe"),
            ("FIINDO_API_BASE_URL", "http://localhost:8080/api/"),
            ("FIINDO_MAX_RETRIES", "5"),
            ("FIINDO_RETRY_BACKOFF", "0.5"),
            ("FIINDO_API_TIMEOUT", "10"),
            ("FIINDO_RETRY_STATUS_CODES", "429, 502,503,"),
            ("FIINDO_ENABLE_SPEEDBOOST", "Yes"),
            ("FIINDO_SPEEDBOOST_URL", " http://boost.local/go "),
            ("MAX_FETCH_WORKERS", "8"),
            ("MAX_WORKERS", "2"),
            ("DATABASE_PATH", "/tmp/etl.db"),
            ("TARGET_INDUSTRIES", "Semiconductors, Banks - Regional"),
        ]))
        .unwrap();

        assert_eq!(config.api.base_url, "http://localhost:8080/api");
        assert_eq!(config.api.retry.max_retries, 5);
        assert_eq!(config.api.retry.backoff, Duration::from_millis(500));
        assert_eq!(config.api.timeout, Duration::from_secs(10));
        assert_eq!(
            config.api.retry.retry_on_status,
            BTreeSet::from([429, 502, 503])
        );
        assert!(config.api.speed_boost.enabled);
        assert_eq!(
            config.api.speed_boost.url_override.as_deref(),
            Some("http://boost.local/go")
        );
        assert_eq!(config.workers.fetch_workers, 8);
        assert_eq!(config.workers.calculate_workers, 2);
        assert_eq!(config.database_path, PathBuf::from("/tmp/etl.db"));
        assert_eq!(
            config.target_industries,
            BTreeSet::from(["Semiconductors".to_string(), "Banks - Regional".to_string()])
        );
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let config = EtlConfig::from_lookup(lookup_from(&[
            ("FIRST_NAME", "Jane"),
            ("LAST_NAME", "Doe"),
            ("FIINDO_MAX_RETRIES", "many"),
            ("FIINDO_RETRY_BACKOFF", "-1"),
            ("MAX_FETCH_WORKERS", "0"),
            ("MAX_WORKERS", "-4"),
        ]))
        .unwrap();

        assert_eq!(config.api.retry.max_retries, 3);
        assert_eq!(config.api.retry.backoff, Duration::from_secs(30));
        assert_eq!(config.workers, WorkerConfig::default());
    }

    #[test]
    fn test_out_of_range_durations_fall_back_to_defaults() {
        let config = EtlConfig::from_lookup(lookup_from(&[
            ("FIRST_NAME", "Jane"),
            ("LAST_NAME", "Doe"),
            ("FIINDO_RETRY_BACKOFF", "1e20"),
            ("FIINDO_API_TIMEOUT", "inf"),
        ]))
        .unwrap();

        assert_eq!(config.api.retry.backoff, Duration::from_secs(30));
        assert_eq!(config.api.timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_blank_speed_boost_override_is_ignored() {
        let config = EtlConfig::from_lookup(lookup_from(&[
            ("FIRST_NAME", "Jane"),
            ("LAST_NAME", "Doe"),
            ("FIINDO_SPEEDBOOST_URL", "   "),
        ]))
        .unwrap();
        assert_eq!(config.api.speed_boost.url_override, None);
    }
}
