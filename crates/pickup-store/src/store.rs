//! File-backed per-product pickup cache.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pickup_core::{
    AppConfig, Clock, Freshness, PickupRecord, PickupSource, ProductPickupFile, StalenessPolicy,
    SystemClock,
};
use tokio::sync::OwnedMutexGuard;

use crate::error::StoreError;
use crate::paths::{file_name_for, is_product_file};
use crate::retry::retry_linear;

/// Tunables for a [`PickupStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub policy: StalenessPolicy,
    /// Total write attempts before a save fails, including the first.
    pub write_attempts: u32,
    /// Base delay between write attempts; attempt `n` waits `n × delay`.
    pub write_retry_delay: Duration,
    /// Upper bound on a single upstream fetch.
    pub fetch_timeout: Duration,
}

impl StoreOptions {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            policy: config.staleness_policy(),
            write_attempts: config.write_retries,
            write_retry_delay: config.write_retry_delay(),
            fetch_timeout: config.fetch_timeout(),
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            policy: StalenessPolicy::default(),
            write_attempts: 3,
            write_retry_delay: Duration::from_millis(100),
            fetch_timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) upstream_fetches: AtomicU64,
    pub(crate) upstream_failures: AtomicU64,
    pub(crate) refreshes_started: AtomicU64,
    pub(crate) refreshes_deduped: AtomicU64,
}

#[derive(Debug)]
pub(crate) struct StoreInner {
    pub(crate) root: PathBuf,
    pub(crate) options: StoreOptions,
    pub(crate) clock: Arc<dyn Clock>,
    /// Product codes with a background refresh currently running.
    pub(crate) in_flight: Mutex<HashSet<String>>,
    /// Serialises read-modify-write cycles on the same product file.
    /// Entries live only while someone holds or waits on them.
    locks: LockMap,
    pub(crate) counters: Counters,
}

/// Durable cache of pickup lists, one JSON file per product code.
///
/// Cloning is cheap and every clone shares the same in-flight refresh set,
/// counters and per-product locks.
#[derive(Debug, Clone)]
pub struct PickupStore {
    pub(crate) inner: Arc<StoreInner>,
}

type LockMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds one product's file lock; dropping it releases the lock and forgets
/// the entry once nobody else wants it.
struct ProductGuard<'a> {
    locks: &'a LockMap,
    product_code: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ProductGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.product_code)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.product_code);
        }
    }
}

pub(crate) enum ReadOutcome {
    Found(ProductPickupFile),
    Missing,
    Corrupt(String),
}

impl PickupStore {
    /// Store rooted at `root` using the wall clock. The directory is created
    /// on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self::with_clock(root, options, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        root: impl Into<PathBuf>,
        options: StoreOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                root: root.into(),
                options,
                clock,
                in_flight: Mutex::new(HashSet::new()),
                locks: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    #[must_use]
    pub fn policy(&self) -> &StalenessPolicy {
        &self.inner.options.policy
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    #[must_use]
    pub fn freshness(&self, file: &ProductPickupFile) -> Freshness {
        self.inner.options.policy.classify(file.fetched_at, self.now())
    }

    #[must_use]
    pub fn path_for(&self, product_code: &str) -> PathBuf {
        self.inner.root.join(file_name_for(product_code))
    }

    /// Whether a file exists for the product. Says nothing about validity.
    pub async fn has(&self, product_code: &str) -> bool {
        tokio::fs::try_exists(self.path_for(product_code))
            .await
            .unwrap_or(false)
    }

    /// Reads the cached file and records the access.
    ///
    /// `None` for a missing file. A file that cannot be read, fails to parse
    /// or names a different product is deleted and also reported as `None`.
    /// Failing to persist the access stats is logged and ignored.
    pub async fn load(&self, product_code: &str) -> Option<ProductPickupFile> {
        let path = self.path_for(product_code);
        let _guard = self.lock_product(product_code).await;

        match read_file(&path, Some(product_code)).await {
            ReadOutcome::Found(mut file) => {
                file.touch(self.now());
                if let Err(e) = write_atomic(&path, &file).await {
                    tracing::debug!(
                        product_code,
                        error = %e,
                        "failed to record pickup file access"
                    );
                }
                Some(file)
            }
            ReadOutcome::Missing => None,
            ReadOutcome::Corrupt(reason) => {
                heal(&path, &reason).await;
                None
            }
        }
    }

    /// Like [`load`](Self::load) but leaves access stats untouched.
    pub async fn peek(&self, product_code: &str) -> Option<ProductPickupFile> {
        let path = self.path_for(product_code);
        match read_file(&path, Some(product_code)).await {
            ReadOutcome::Found(file) => Some(file),
            ReadOutcome::Missing => None,
            ReadOutcome::Corrupt(reason) => {
                let _guard = self.lock_product(product_code).await;
                heal(&path, &reason).await;
                None
            }
        }
    }

    /// Writes a fresh file for the product, replacing any previous one.
    ///
    /// The write goes to a temp file that is renamed into place, so readers
    /// never observe a half-written file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] once every configured attempt has failed.
    pub async fn save(
        &self,
        product_code: &str,
        pickups: Vec<PickupRecord>,
        source: PickupSource,
    ) -> Result<ProductPickupFile, StoreError> {
        let file = ProductPickupFile::new(product_code, pickups, source, self.now());
        self.write(&file).await?;
        tracing::debug!(
            product_code,
            pickups = file.pickups.len(),
            source = %file.source,
            "saved pickup file"
        );
        Ok(file)
    }

    /// Stores newly fetched pickups for a product. Unlike [`save`](Self::save)
    /// an existing file keeps its access stats; only the pickups, source and
    /// fetch time change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] once every configured attempt has failed.
    pub async fn save_fetched(
        &self,
        product_code: &str,
        pickups: Vec<PickupRecord>,
        source: PickupSource,
    ) -> Result<ProductPickupFile, StoreError> {
        let path = self.path_for(product_code);
        let _guard = self.lock_product(product_code).await;

        let now = self.now();
        let file = match read_file(&path, Some(product_code)).await {
            ReadOutcome::Found(mut existing) => {
                existing.refresh(pickups, source, now);
                existing
            }
            ReadOutcome::Missing | ReadOutcome::Corrupt(_) => {
                ProductPickupFile::new(product_code, pickups, source, now)
            }
        };
        self.write_locked(&file).await?;
        tracing::debug!(
            product_code,
            pickups = file.pickups.len(),
            access_count = file.access_count,
            "refreshed pickup file"
        );
        Ok(file)
    }

    /// Operator-entered pickups for a product the upstream does not describe
    /// well.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] once every configured attempt has failed.
    pub async fn save_manual(
        &self,
        product_code: &str,
        pickups: Vec<PickupRecord>,
    ) -> Result<ProductPickupFile, StoreError> {
        self.save(product_code, pickups, PickupSource::Manual).await
    }

    /// Bulk-seeds the store, e.g. from an export of another deployment.
    /// Stops at the first write failure; earlier products stay written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] for the first product that cannot be saved.
    pub async fn import<I>(&self, entries: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = (String, Vec<PickupRecord>)>,
    {
        let mut written = 0;
        for (product_code, pickups) in entries {
            self.save(&product_code, pickups, PickupSource::Imported)
                .await?;
            written += 1;
        }
        tracing::info!(written, "imported pickup files");
        Ok(written)
    }

    /// Persists an already-built file as-is.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] once every configured attempt has failed.
    pub async fn write(&self, file: &ProductPickupFile) -> Result<(), StoreError> {
        let _guard = self.lock_product(&file.product_code).await;
        self.write_locked(file).await
    }

    /// [`write`](Self::write) for callers already holding the product lock.
    async fn write_locked(&self, file: &ProductPickupFile) -> Result<(), StoreError> {
        let path = self.path_for(&file.product_code);
        let path = path.as_path();
        let root = self.inner.root.as_path();
        let attempts = self.inner.options.write_attempts.max(1);

        retry_linear(attempts, self.inner.options.write_retry_delay, || async move {
            tokio::fs::create_dir_all(root).await?;
            write_atomic(path, file).await
        })
        .await
        .map_err(|source| {
            tracing::error!(
                product_code = %file.product_code,
                attempts,
                error = %source,
                "giving up on pickup file write"
            );
            StoreError::Write {
                product_code: file.product_code.clone(),
                attempts,
                source,
            }
        })
    }

    /// Removes the product's file. Removing a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be removed.
    pub async fn delete(&self, product_code: &str) -> Result<(), StoreError> {
        let path = self.path_for(product_code);
        let _guard = self.lock_product(product_code).await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                context: format!("deleting {}", path.display()),
                source,
            }),
        }
    }

    /// Every valid file in the store, without recording access.
    ///
    /// Corrupt files found along the way are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store directory cannot be listed.
    pub async fn scan(&self) -> Result<Vec<ProductPickupFile>, StoreError> {
        self.collect_files(true).await
    }

    /// Like [`scan`](Self::scan) but leaves corrupt files where they are.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store directory cannot be listed.
    pub async fn scan_read_only(&self) -> Result<Vec<ProductPickupFile>, StoreError> {
        self.collect_files(false).await
    }

    async fn collect_files(&self, heal_bad: bool) -> Result<Vec<ProductPickupFile>, StoreError> {
        let mut files = Vec::new();
        for path in self.product_paths().await? {
            let reason = match read_file(&path, None).await {
                ReadOutcome::Found(file) if path_matches(&path, &file.product_code) => {
                    files.push(file);
                    continue;
                }
                ReadOutcome::Found(_) => "file name does not match productCode".to_string(),
                ReadOutcome::Missing => continue,
                ReadOutcome::Corrupt(reason) => reason,
            };
            if heal_bad {
                heal(&path, &reason).await;
            } else {
                tracing::debug!(
                    path = %path.display(),
                    reason = %reason,
                    "skipping unreadable pickup file"
                );
            }
        }
        Ok(files)
    }

    /// Product codes with a valid file in the store, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store directory cannot be listed.
    pub async fn list_product_codes(&self) -> Result<Vec<String>, StoreError> {
        let mut codes: Vec<String> = self
            .scan()
            .await?
            .into_iter()
            .map(|f| f.product_code)
            .collect();
        codes.sort();
        Ok(codes)
    }

    /// Paths of every `*.json` entry in the store directory. A store that
    /// has never been written to is empty, not an error.
    pub(crate) async fn product_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.inner.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    context: format!("listing {}", self.inner.root.display()),
                    source,
                })
            }
        };

        let mut paths = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| StoreError::Io {
                context: format!("listing {}", self.inner.root.display()),
                source,
            })?;
            let Some(entry) = entry else { break };
            let name = entry.file_name();
            if name.to_str().is_some_and(is_product_file) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn lock_product(&self, product_code: &str) -> ProductGuard<'_> {
        let lock = {
            let mut locks = self
                .inner
                .locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(product_code.to_string()).or_default())
        };
        ProductGuard {
            locks: &self.inner.locks,
            product_code: product_code.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Product codes with a live lock entry.
    #[cfg(test)]
    pub(crate) fn held_locks(&self) -> usize {
        self.inner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub(crate) async fn read_file(path: &Path, expected_code: Option<&str>) -> ReadOutcome {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return ReadOutcome::Missing,
        Err(e) => return ReadOutcome::Corrupt(format!("unreadable: {e}")),
    };

    let file: ProductPickupFile = match serde_json::from_slice(&bytes) {
        Ok(file) => file,
        Err(e) => return ReadOutcome::Corrupt(format!("invalid JSON: {e}")),
    };

    if let Some(expected) = expected_code {
        if file.product_code != expected {
            return ReadOutcome::Corrupt(format!(
                "productCode mismatch: expected {expected}, found {}",
                file.product_code
            ));
        }
    }
    ReadOutcome::Found(file)
}

pub(crate) fn path_matches(path: &Path, product_code: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == file_name_for(product_code))
}

async fn write_atomic(path: &Path, file: &ProductPickupFile) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(file).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &body).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Deletes a corrupt file so the next read is a clean miss.
async fn heal(path: &Path, reason: &str) {
    tracing::warn!(path = %path.display(), reason, "removing corrupt pickup file");
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove corrupt pickup file"
        ),
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
