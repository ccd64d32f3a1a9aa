use std::path::PathBuf;
use std::time::Duration;

use crate::pickup::StalenessPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub log_level: String,
    pub store_dir: PathBuf,
    pub regions_path: Option<PathBuf>,
    pub stale_after_secs: u64,
    pub expire_after_secs: u64,
    pub fetch_timeout_secs: u64,
    pub preload_batch_size: usize,
    pub write_retries: u32,
    pub write_retry_delay_ms: u64,
    pub rezdy_api_key: Option<String>,
    pub rezdy_base_url: String,
    pub upstream_max_retries: u32,
    pub upstream_backoff_ms: u64,
}

impl AppConfig {
    /// Staleness thresholds as a [`StalenessPolicy`].
    #[must_use]
    pub fn staleness_policy(&self) -> StalenessPolicy {
        StalenessPolicy::from_secs(self.stale_after_secs, self.expire_after_secs)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub fn write_retry_delay(&self) -> Duration {
        Duration::from_millis(self.write_retry_delay_ms)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("store_dir", &self.store_dir)
            .field("regions_path", &self.regions_path)
            .field("stale_after_secs", &self.stale_after_secs)
            .field("expire_after_secs", &self.expire_after_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("preload_batch_size", &self.preload_batch_size)
            .field("write_retries", &self.write_retries)
            .field("write_retry_delay_ms", &self.write_retry_delay_ms)
            .field(
                "rezdy_api_key",
                &self.rezdy_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("rezdy_base_url", &self.rezdy_base_url)
            .field("upstream_max_retries", &self.upstream_max_retries)
            .field("upstream_backoff_ms", &self.upstream_backoff_ms)
            .finish()
    }
}
