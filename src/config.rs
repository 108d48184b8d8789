//! Configuration for the `tryl` command-line sender.

use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tryl_delivery::{BatchConfig, ClientConfig, RetryPolicy, DEFAULT_BASE_URL};

const CONFIG_FILE: &str = "tryl.toml";
const ENV_PREFIX: &str = "TRYL_";

/// Sender configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `TRYL_` (highest priority)
/// 2. Configuration file (`tryl.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Durations are given in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// API key used to authenticate.
    ///
    /// Environment variable: `TRYL_API_KEY`
    pub api_key: String,
    /// API base URL.
    ///
    /// Environment variable: `TRYL_BASE_URL`
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    ///
    /// Environment variable: `TRYL_TIMEOUT_MS`
    pub timeout_ms: u64,
    /// Appended to the User-Agent header.
    ///
    /// Environment variable: `TRYL_USER_AGENT_SUFFIX`
    pub user_agent_suffix: Option<String>,

    // Retry
    /// Maximum attempts per request, including the first.
    ///
    /// Environment variable: `TRYL_MAX_RETRY_ATTEMPTS`
    pub max_retry_attempts: u32,
    /// Delay before the first retry in milliseconds.
    ///
    /// Environment variable: `TRYL_RETRY_BASE_DELAY_MS`
    pub retry_base_delay_ms: u64,
    /// Upper bound on the backoff in milliseconds.
    ///
    /// Environment variable: `TRYL_RETRY_MAX_DELAY_MS`
    pub retry_max_delay_ms: u64,
    /// Backoff multiplier.
    ///
    /// Environment variable: `TRYL_RETRY_MULTIPLIER`
    pub retry_multiplier: f64,
    /// Jitter fraction (0.0 to 1.0).
    ///
    /// Environment variable: `TRYL_RETRY_JITTER_FACTOR`
    pub retry_jitter_factor: f64,

    // Batching
    /// Send through the background batcher.
    ///
    /// Environment variable: `TRYL_BATCHING`
    pub batching: bool,
    /// Events per batch request.
    ///
    /// Environment variable: `TRYL_BATCH_SIZE`
    pub batch_size: usize,
    /// Partial batch flush interval in milliseconds.
    ///
    /// Environment variable: `TRYL_FLUSH_INTERVAL_MS`
    pub flush_interval_ms: u64,
    /// Batcher queue capacity.
    ///
    /// Environment variable: `TRYL_MAX_PENDING_EVENTS`
    pub max_pending_events: usize,

    /// How long shutdown waits for queued events, in milliseconds.
    ///
    /// Environment variable: `TRYL_SHUTDOWN_TIMEOUT_MS`
    pub shutdown_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        let batching = BatchConfig::default();

        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: 10_000,
            user_agent_suffix: None,
            max_retry_attempts: retry.max_attempts,
            retry_base_delay_ms: duration_ms(retry.base_delay),
            retry_max_delay_ms: duration_ms(retry.max_delay),
            retry_multiplier: retry.multiplier,
            retry_jitter_factor: retry.jitter_factor,
            batching: false,
            batch_size: batching.max_batch_size,
            flush_interval_ms: duration_ms(batching.flush_interval),
            max_pending_events: batching.max_pending_events,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl AppConfig {
    /// Loads configuration from defaults, `tryl.toml`, and `TRYL_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        let config: Self = Self::figment().extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Converts to the client's configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            user_agent_suffix: self.user_agent_suffix.clone(),
            retry: self.to_retry_policy(),
            batching: self.batching.then(|| BatchConfig {
                max_batch_size: self.batch_size,
                flush_interval: Duration::from_millis(self.flush_interval_ms),
                max_pending_events: self.max_pending_events,
            }),
        }
    }

    /// Converts to the retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            multiplier: self.retry_multiplier,
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// Shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// API key with everything after the environment prefix masked.
    pub fn api_key_masked(&self) -> String {
        match self.api_key.rfind('_') {
            Some(prefix_end) if prefix_end + 1 < self.api_key.len() => {
                format!("{}***", &self.api_key[..=prefix_end])
            },
            _ => "***".to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("api_key is required (set TRYL_API_KEY)");
        }

        self.to_client_config().validate().context("Invalid client configuration")?;
        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
