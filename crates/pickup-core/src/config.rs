use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

const DEFAULT_REZDY_BASE_URL: &str = "https://api.rezdy.com/v1/";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid or the staleness thresholds
/// are inconsistent.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files. Use it in tests
/// or when the caller manages env setup.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid or the staleness thresholds
/// are inconsistent.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so tests can drive it with a plain
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let env = parse_environment(&or_default("PICKUP_ENV", "development"));
    let log_level = or_default("PICKUP_LOG_LEVEL", "info");
    let store_dir = PathBuf::from(or_default("PICKUP_STORE_DIR", "./data/pickups"));
    let regions_path = lookup("PICKUP_REGIONS_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);

    let stale_after_secs = parse_u64("PICKUP_STALE_AFTER_SECS", "43200")?;
    let expire_after_secs = parse_u64("PICKUP_EXPIRE_AFTER_SECS", "86400")?;
    if stale_after_secs > expire_after_secs {
        return Err(ConfigError::Validation(format!(
            "PICKUP_STALE_AFTER_SECS ({stale_after_secs}) must not exceed \
             PICKUP_EXPIRE_AFTER_SECS ({expire_after_secs})"
        )));
    }

    let fetch_timeout_secs = parse_u64("PICKUP_FETCH_TIMEOUT_SECS", "8")?;
    let preload_batch_size = parse_usize("PICKUP_PRELOAD_BATCH_SIZE", "5")?;
    if preload_batch_size == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "PICKUP_PRELOAD_BATCH_SIZE".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let write_retries = parse_u32("PICKUP_WRITE_RETRIES", "3")?;
    if write_retries == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "PICKUP_WRITE_RETRIES".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    let write_retry_delay_ms = parse_u64("PICKUP_WRITE_RETRY_DELAY_MS", "100")?;

    let rezdy_api_key = lookup("REZDY_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    if env == Environment::Production && rezdy_api_key.is_none() {
        return Err(ConfigError::MissingEnvVar("REZDY_API_KEY".to_string()));
    }
    let rezdy_base_url = or_default("REZDY_BASE_URL", DEFAULT_REZDY_BASE_URL);
    let upstream_max_retries = parse_u32("PICKUP_UPSTREAM_MAX_RETRIES", "2")?;
    let upstream_backoff_ms = parse_u64("PICKUP_UPSTREAM_BACKOFF_MS", "500")?;

    Ok(AppConfig {
        env,
        log_level,
        store_dir,
        regions_path,
        stale_after_secs,
        expire_after_secs,
        fetch_timeout_secs,
        preload_batch_size,
        write_retries,
        write_retry_delay_ms,
        rezdy_api_key,
        rezdy_base_url,
        upstream_max_retries,
        upstream_backoff_ms,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
