use std::collections::HashMap;
use std::env::VarError;

use super::*;

fn lookup_from_map<'a>(
    map: &'a HashMap<&'a str, &'a str>,
) -> impl Fn(&str) -> Result<String, VarError> + 'a {
    move |key| {
        map.get(key)
            .map(|v| (*v).to_string())
            .ok_or(VarError::NotPresent)
    }
}

#[test]
fn parse_environment_production() {
    assert_eq!(parse_environment("production"), Environment::Production);
}

#[test]
fn parse_environment_unknown_defaults_to_development() {
    assert_eq!(parse_environment("staging"), Environment::Development);
}

#[test]
fn build_app_config_defaults_with_empty_env() {
    let map: HashMap<&str, &str> = HashMap::new();
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();

    assert_eq!(cfg.env, Environment::Development);
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.store_dir.to_str(), Some("./data/pickups"));
    assert!(cfg.regions_path.is_none());
    assert_eq!(cfg.stale_after_secs, 43_200);
    assert_eq!(cfg.expire_after_secs, 86_400);
    assert_eq!(cfg.fetch_timeout_secs, 8);
    assert_eq!(cfg.preload_batch_size, 5);
    assert_eq!(cfg.write_retries, 3);
    assert_eq!(cfg.write_retry_delay_ms, 100);
    assert!(cfg.rezdy_api_key.is_none());
    assert_eq!(cfg.rezdy_base_url, "https://api.rezdy.com/v1/");
    assert_eq!(cfg.upstream_max_retries, 2);
    assert_eq!(cfg.upstream_backoff_ms, 500);
}

#[test]
fn build_app_config_reads_overrides() {
    let mut map = HashMap::new();
    map.insert("PICKUP_ENV", "production");
    map.insert("PICKUP_STORE_DIR", "/var/lib/pickups");
    map.insert("PICKUP_REGIONS_PATH", "./config/regions.yaml");
    map.insert("PICKUP_STALE_AFTER_SECS", "600");
    map.insert("PICKUP_EXPIRE_AFTER_SECS", "1200");
    map.insert("PICKUP_PRELOAD_BATCH_SIZE", "10");
    map.insert("REZDY_API_KEY", "secret-key");

    let cfg = build_app_config(lookup_from_map(&map)).unwrap();

    assert_eq!(cfg.env, Environment::Production);
    assert_eq!(cfg.store_dir.to_str(), Some("/var/lib/pickups"));
    assert_eq!(
        cfg.regions_path.as_deref().and_then(|p| p.to_str()),
        Some("./config/regions.yaml")
    );
    assert_eq!(cfg.stale_after_secs, 600);
    assert_eq!(cfg.expire_after_secs, 1200);
    assert_eq!(cfg.preload_batch_size, 10);
    assert_eq!(cfg.rezdy_api_key.as_deref(), Some("secret-key"));
}

#[test]
fn build_app_config_production_requires_api_key() {
    let mut map = HashMap::new();
    map.insert("PICKUP_ENV", "production");
    map.insert("REZDY_API_KEY", " ");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::MissingEnvVar(ref var)) if var == "REZDY_API_KEY"),
        "expected MissingEnvVar, got: {result:?}"
    );
}

#[test]
fn build_app_config_blank_api_key_is_none() {
    let mut map = HashMap::new();
    map.insert("REZDY_API_KEY", "   ");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert!(cfg.rezdy_api_key.is_none());
}

#[test]
fn build_app_config_rejects_invalid_number() {
    let mut map = HashMap::new();
    map.insert("PICKUP_FETCH_TIMEOUT_SECS", "soon");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "PICKUP_FETCH_TIMEOUT_SECS"),
        "expected InvalidEnvVar(PICKUP_FETCH_TIMEOUT_SECS), got: {result:?}"
    );
}

#[test]
fn build_app_config_rejects_zero_batch_size() {
    let mut map = HashMap::new();
    map.insert("PICKUP_PRELOAD_BATCH_SIZE", "0");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == "PICKUP_PRELOAD_BATCH_SIZE"),
        "expected InvalidEnvVar(PICKUP_PRELOAD_BATCH_SIZE), got: {result:?}"
    );
}

#[test]
fn build_app_config_rejects_stale_after_expire() {
    let mut map = HashMap::new();
    map.insert("PICKUP_STALE_AFTER_SECS", "90000");
    map.insert("PICKUP_EXPIRE_AFTER_SECS", "86400");
    let result = build_app_config(lookup_from_map(&map));
    assert!(
        matches!(result, Err(ConfigError::Validation(_))),
        "expected Validation error, got: {result:?}"
    );
}

#[test]
fn debug_output_redacts_api_key() {
    let mut map = HashMap::new();
    map.insert("REZDY_API_KEY", "super-secret");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    let rendered = format!("{cfg:?}");
    assert!(!rendered.contains("super-secret"));
    assert!(rendered.contains("[redacted]"));
}

#[test]
fn staleness_policy_reflects_thresholds() {
    let mut map = HashMap::new();
    map.insert("PICKUP_STALE_AFTER_SECS", "60");
    map.insert("PICKUP_EXPIRE_AFTER_SECS", "120");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    let policy = cfg.staleness_policy();
    assert_eq!(policy.stale_after().num_seconds(), 60);
    assert_eq!(policy.expire_after().num_seconds(), 120);
}
