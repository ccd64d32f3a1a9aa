//! Upstream-backed reads: fetch on miss, refresh when stale.
//!
//! | File state | Behaviour                                                  |
//! |------------|------------------------------------------------------------|
//! | missing    | fetch synchronously; fetch errors propagate                |
//! | fresh      | return cached pickups                                      |
//! | stale      | return cached pickups, refresh in the background           |
//! | expired    | fetch synchronously; on fetch failure serve the old data   |
//!
//! At most one background refresh runs per product code at a time.

use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use pickup_core::{
    FetchError, Freshness, PickupFetcher, PickupRecord, PickupSource, ProductPickupFile,
};
use serde::Serialize;

use crate::error::StoreError;
use crate::store::PickupStore;

/// Notified after a fetch lands on disk, so derived state can follow.
pub trait RefreshObserver: Send + Sync {
    fn pickups_refreshed(&self, file: &ProductPickupFile);
}

/// Upstream and background-refresh counters since the store was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStats {
    pub upstream_fetches: u64,
    pub upstream_failures: u64,
    pub refreshes_started: u64,
    pub refreshes_deduped: u64,
    pub refreshes_in_flight: usize,
}

impl PickupStore {
    /// Cached pickups, fetching and persisting them on a miss.
    ///
    /// Freshness is not consulted: any valid cached file is returned.
    ///
    /// # Errors
    ///
    /// [`StoreError::Fetch`] when the product is not cached and the fetch
    /// fails; [`StoreError::Write`] when the fetched data cannot be saved.
    pub async fn get_or_fetch(
        &self,
        product_code: &str,
        fetcher: &dyn PickupFetcher,
    ) -> Result<Vec<PickupRecord>, StoreError> {
        Ok(self.get_or_fetch_file(product_code, fetcher).await?.pickups)
    }

    /// [`get_or_fetch`](Self::get_or_fetch), returning the whole file.
    ///
    /// # Errors
    ///
    /// See [`get_or_fetch`](Self::get_or_fetch).
    pub async fn get_or_fetch_file(
        &self,
        product_code: &str,
        fetcher: &dyn PickupFetcher,
    ) -> Result<ProductPickupFile, StoreError> {
        if let Some(file) = self.load(product_code).await {
            return Ok(file);
        }
        self.fetch_and_save(product_code, fetcher).await
    }

    /// Fetches from upstream and overwrites the cached file.
    ///
    /// A failed fetch leaves the existing file untouched.
    ///
    /// # Errors
    ///
    /// [`StoreError::Fetch`] on fetch failure or timeout; [`StoreError::Write`]
    /// when the result cannot be saved.
    pub async fn fetch_and_save(
        &self,
        product_code: &str,
        fetcher: &dyn PickupFetcher,
    ) -> Result<ProductPickupFile, StoreError> {
        let pickups = self.fetch_with_timeout(product_code, fetcher).await?;
        self.save_fetched(product_code, pickups, PickupSource::UpstreamApi)
            .await
    }

    /// Cached pickups with stale-while-revalidate semantics (see module docs).
    ///
    /// `observer` hears about every fetch that lands on disk, including ones
    /// finished later by the background task.
    ///
    /// # Errors
    ///
    /// [`StoreError::Fetch`] only when nothing is cached and the fetch fails.
    /// [`StoreError::Write`] when fetched data cannot be saved and there is no
    /// cached copy to serve instead.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime when the cached file is
    /// stale, since the refresh is spawned onto it.
    pub async fn get_with_background_refresh(
        &self,
        product_code: &str,
        fetcher: Arc<dyn PickupFetcher>,
        observer: Option<Arc<dyn RefreshObserver>>,
    ) -> Result<Vec<PickupRecord>, StoreError> {
        let Some(cached) = self.load(product_code).await else {
            let file = self.fetch_and_save(product_code, fetcher.as_ref()).await?;
            notify(observer.as_deref(), &file);
            return Ok(file.pickups);
        };

        match self.freshness(&cached) {
            Freshness::Fresh => Ok(cached.pickups),
            Freshness::Stale => {
                self.schedule_refresh(product_code, fetcher, observer);
                Ok(cached.pickups)
            }
            Freshness::Expired => {
                match self.fetch_and_save(product_code, fetcher.as_ref()).await {
                    Ok(file) => {
                        notify(observer.as_deref(), &file);
                        Ok(file.pickups)
                    }
                    Err(e) => {
                        tracing::warn!(
                            product_code,
                            error = %e,
                            fetched_at = %cached.fetched_at,
                            "refresh of expired pickups failed, serving cached copy"
                        );
                        Ok(cached.pickups)
                    }
                }
            }
        }
    }

    /// Starts a background refresh unless one is already running for the
    /// product. Returns `true` if a new refresh was started.
    ///
    /// The refresh is fire-and-forget: its failure only logs, and the cached
    /// file stays as it was.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn schedule_refresh(
        &self,
        product_code: &str,
        fetcher: Arc<dyn PickupFetcher>,
        observer: Option<Arc<dyn RefreshObserver>>,
    ) -> bool {
        let Some(guard) = InFlightGuard::acquire(self, product_code) else {
            self.inner
                .counters
                .refreshes_deduped
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(product_code, "background refresh already in flight");
            return false;
        };
        self.inner
            .counters
            .refreshes_started
            .fetch_add(1, Ordering::Relaxed);

        let store = self.clone();
        let product_code = product_code.to_string();
        tokio::spawn(async move {
            let _in_flight = guard;
            match store.fetch_and_save(&product_code, fetcher.as_ref()).await {
                Ok(file) => {
                    tracing::info!(
                        product_code = %product_code,
                        pickups = file.pickups.len(),
                        "background pickup refresh complete"
                    );
                    notify(observer.as_deref(), &file);
                }
                Err(e) => tracing::warn!(
                    product_code = %product_code,
                    error = %e,
                    "background pickup refresh failed, keeping cached copy"
                ),
            }
        });
        true
    }

    /// Whether a background refresh is currently running for the product.
    #[must_use]
    pub fn is_refreshing(&self, product_code: &str) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(product_code)
    }

    #[must_use]
    pub fn refresh_stats(&self) -> RefreshStats {
        let counters = &self.inner.counters;
        RefreshStats {
            upstream_fetches: counters.upstream_fetches.load(Ordering::Relaxed),
            upstream_failures: counters.upstream_failures.load(Ordering::Relaxed),
            refreshes_started: counters.refreshes_started.load(Ordering::Relaxed),
            refreshes_deduped: counters.refreshes_deduped.load(Ordering::Relaxed),
            refreshes_in_flight: self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    async fn fetch_with_timeout(
        &self,
        product_code: &str,
        fetcher: &dyn PickupFetcher,
    ) -> Result<Vec<PickupRecord>, FetchError> {
        let counters = &self.inner.counters;
        counters.upstream_fetches.fetch_add(1, Ordering::Relaxed);
        let timeout = self.inner.options.fetch_timeout;

        let result = match tokio::time::timeout(timeout, fetcher.fetch_pickups(product_code)).await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                product_code: product_code.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        if let Err(e) = &result {
            counters.upstream_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(product_code, error = %e, "upstream pickup fetch failed");
        }
        result
    }
}

fn notify(observer: Option<&dyn RefreshObserver>, file: &ProductPickupFile) {
    if let Some(observer) = observer {
        observer.pickups_refreshed(file);
    }
}

/// Marks a product as refreshing for as long as it lives, including when the
/// refresh task panics.
struct InFlightGuard {
    store: PickupStore,
    product_code: String,
}

impl InFlightGuard {
    fn acquire(store: &PickupStore, product_code: &str) -> Option<Self> {
        let inserted = store
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product_code.to_string());
        inserted.then(|| Self {
            store: store.clone(),
            product_code: product_code.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.store
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.product_code);
    }
}
