//! Store maintenance and observability command handlers.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::TimeDelta;
use pickup_core::PickupRecord;
use pickup_resolver::PickupResolver;
use pickup_store::CleanupPolicy;
use serde_json::json;

use crate::print_json;

/// Read-only: corrupt files are counted, not removed, and the index is
/// surveyed rather than built.
pub(crate) async fn run_stats(resolver: &PickupResolver) -> anyhow::Result<()> {
    let store = resolver.store_stats().await?;
    let index = resolver.index().survey().await?;
    print_json(&json!({
        "store": store,
        "index": index,
        "cache": resolver.cache_stats(),
    }))
}

pub(crate) async fn run_rebuild_index(resolver: &PickupResolver) -> anyhow::Result<()> {
    let metadata = resolver.rebuild_index().await?;
    print_json(&metadata)
}

/// Builds a cleanup policy from CLI flags. At least one criterion is
/// required so a bare `cleanup` never looks like it did something.
pub(crate) fn cleanup_policy(
    max_age_hours: Option<i64>,
    min_access: Option<u64>,
) -> anyhow::Result<CleanupPolicy> {
    if max_age_hours.is_none() && min_access.is_none() {
        anyhow::bail!("cleanup needs --max-age-hours and/or --min-access");
    }
    let max_age = match max_age_hours {
        Some(hours) if hours < 0 => anyhow::bail!("--max-age-hours must not be negative"),
        Some(hours) => Some(
            TimeDelta::try_hours(hours)
                .ok_or_else(|| anyhow::anyhow!("--max-age-hours {hours} is out of range"))?,
        ),
        None => None,
    };
    Ok(CleanupPolicy {
        max_age,
        min_access_count: min_access,
    })
}

pub(crate) async fn run_cleanup(
    resolver: &PickupResolver,
    max_age_hours: Option<i64>,
    min_access: Option<u64>,
) -> anyhow::Result<()> {
    let policy = cleanup_policy(max_age_hours, min_access)?;
    resolver.index().ensure_built().await?;
    let report = resolver.cleanup(policy).await?;
    print_json(&report)
}

/// Reads an import file: a JSON object keyed by product code.
pub(crate) fn read_import(path: &Path) -> anyhow::Result<BTreeMap<String, Vec<PickupRecord>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read import file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| {
        format!(
            "{} must be a JSON object of product code to pickup list",
            path.display()
        )
    })
}

pub(crate) async fn run_import(resolver: &PickupResolver, path: &Path) -> anyhow::Result<()> {
    let entries = read_import(path)?;
    let imported = resolver.store().import(entries).await?;
    let metadata = resolver.rebuild_index().await?;
    print_json(&json!({
        "imported": imported,
        "index": metadata,
    }))
}

pub(crate) fn run_regions(resolver: &PickupResolver) -> anyhow::Result<()> {
    let regions: Vec<&str> = resolver
        .normalizer()
        .table()
        .regions()
        .map(pickup_core::Region::as_str)
        .collect();
    print_json(&regions)
}
