//! Store-wide reporting and eviction.

use chrono::{DateTime, TimeDelta, Utc};
use pickup_core::{Freshness, ProductPickupFile};
use serde::Serialize;

use crate::error::StoreError;
use crate::store::{path_matches, read_file, PickupStore, ReadOutcome};

/// Snapshot of what is on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_files: usize,
    pub fresh: usize,
    pub stale: usize,
    pub expired: usize,
    /// Files that would be removed on the next read.
    pub corrupt: usize,
    /// Valid files recording that the product has no pickup service.
    pub without_pickups: usize,
    pub total_bytes: u64,
    pub oldest_fetch: Option<DateTime<Utc>>,
    pub newest_fetch: Option<DateTime<Utc>>,
}

/// Eviction criteria for [`PickupStore::cleanup`]. A file is removed when
/// any set criterion matches; unset criteria never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupPolicy {
    /// Remove files fetched longer ago than this.
    pub max_age: Option<TimeDelta>,
    /// Remove files read fewer times than this.
    pub min_access_count: Option<u64>,
}

impl CleanupPolicy {
    fn evicts(&self, file: &ProductPickupFile, now: DateTime<Utc>) -> bool {
        let too_old = self
            .max_age
            .is_some_and(|max_age| now.signed_duration_since(file.fetched_at) > max_age);
        let unpopular = self
            .min_access_count
            .is_some_and(|min| file.access_count < min);
        too_old || unpopular
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub scanned: usize,
    pub removed: Vec<String>,
    pub bytes_freed: u64,
}

impl PickupStore {
    /// Classifies every file on disk. Read-only: corrupt files are counted,
    /// not removed, and access stats are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store directory cannot be listed.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let now = self.now();
        let mut stats = StoreStats::default();

        for path in self.product_paths().await? {
            let file = match read_file(&path, None).await {
                ReadOutcome::Found(file) if path_matches(&path, &file.product_code) => file,
                ReadOutcome::Missing => continue,
                ReadOutcome::Found(_) | ReadOutcome::Corrupt(_) => {
                    stats.corrupt += 1;
                    continue;
                }
            };

            stats.total_files += 1;
            stats.total_bytes += file_len(&path).await;
            match self.policy().classify(file.fetched_at, now) {
                Freshness::Fresh => stats.fresh += 1,
                Freshness::Stale => stats.stale += 1,
                Freshness::Expired => stats.expired += 1,
            }
            if !file.has_pickups() {
                stats.without_pickups += 1;
            }
            stats.oldest_fetch = Some(
                stats
                    .oldest_fetch
                    .map_or(file.fetched_at, |t| t.min(file.fetched_at)),
            );
            stats.newest_fetch = Some(
                stats
                    .newest_fetch
                    .map_or(file.fetched_at, |t| t.max(file.fetched_at)),
            );
        }

        Ok(stats)
    }

    /// Removes every file the policy evicts. Corrupt files are removed too,
    /// as a side effect of scanning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be listed or an
    /// evicted file cannot be removed.
    pub async fn cleanup(&self, policy: CleanupPolicy) -> Result<CleanupReport, StoreError> {
        let now = self.now();
        let files = self.scan().await?;
        let mut report = CleanupReport {
            scanned: files.len(),
            ..CleanupReport::default()
        };

        for file in files.into_iter().filter(|f| policy.evicts(f, now)) {
            let bytes = file_len(&self.path_for(&file.product_code)).await;
            self.delete(&file.product_code).await?;
            report.bytes_freed += bytes;
            report.removed.push(file.product_code);
        }

        tracing::info!(
            scanned = report.scanned,
            removed = report.removed.len(),
            bytes_freed = report.bytes_freed,
            "pickup store cleanup complete"
        );
        Ok(report)
    }
}

async fn file_len(path: &std::path::Path) -> u64 {
    tokio::fs::metadata(path).await.map_or(0, |m| m.len())
}
