//! Resolution tiers, tried in order until a product is resolved.
//!
//! Each tier answers one question for one product: does it pick up in the
//! requested region? [`TierOutcome::Unknown`] and [`TierOutcome::Unavailable`]
//! pass the product on to the next tier.

use std::sync::Arc;

use async_trait::async_trait;
use pickup_core::{Freshness, LocationNormalizer, PickupFetcher, Product, Region};
use pickup_store::{PickupStore, RefreshObserver, StoreError};
use serde::Serialize;

use crate::error::ResolveError;
use crate::index::{IndexEntry, LocationIndex};
use crate::text::infer_regions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Index,
    LiveFetch,
    FreeText,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Tier::Index => "index",
            Tier::LiveFetch => "live_fetch",
            Tier::FreeText => "free_text",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOutcome {
    Matched,
    /// The tier has data for the product and it does not serve the region.
    NotMatched,
    /// The tier has nothing to say about the product.
    Unknown,
    /// The tier tried and its data source failed.
    Unavailable,
}

impl TierOutcome {
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(self, TierOutcome::Matched | TierOutcome::NotMatched)
    }

    fn from_regions(matched: bool) -> Self {
        if matched {
            TierOutcome::Matched
        } else {
            TierOutcome::NotMatched
        }
    }
}

/// One tier of the resolution chain.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn tier(&self) -> Tier;

    /// How many products this tier may work on at once.
    fn concurrency(&self) -> usize {
        1
    }

    /// # Errors
    ///
    /// Only infrastructure failures; missing data is [`TierOutcome::Unknown`].
    async fn attempt(&self, product: &Product, region: &Region)
        -> Result<TierOutcome, ResolveError>;
}

/// Answers from the in-memory index, falling back to the store for products
/// stored after the last build. Entries past their fresh window get a
/// background refresh when a fetcher is available.
pub struct IndexStrategy {
    index: Arc<LocationIndex>,
    store: PickupStore,
    fetcher: Option<Arc<dyn PickupFetcher>>,
}

impl IndexStrategy {
    #[must_use]
    pub fn new(
        index: Arc<LocationIndex>,
        store: PickupStore,
        fetcher: Option<Arc<dyn PickupFetcher>>,
    ) -> Self {
        Self {
            index,
            store,
            fetcher,
        }
    }

    fn refresh_if_aging(&self, entry: &IndexEntry) {
        let Some(fetcher) = &self.fetcher else {
            return;
        };
        if self.store.policy().classify(entry.fetched_at, self.store.now()) == Freshness::Fresh {
            return;
        }
        let observer: Arc<dyn RefreshObserver> = self.index.clone();
        self.store
            .schedule_refresh(&entry.product_code, Arc::clone(fetcher), Some(observer));
    }
}

#[async_trait]
impl ResolutionStrategy for IndexStrategy {
    fn tier(&self) -> Tier {
        Tier::Index
    }

    async fn attempt(
        &self,
        product: &Product,
        region: &Region,
    ) -> Result<TierOutcome, ResolveError> {
        let code = &product.product_code;
        let entry = match self.index.entry(code) {
            Some(entry) => Some(entry),
            None => self.index.refresh_one(code).await,
        };
        let Some(entry) = entry else {
            return Ok(TierOutcome::Unknown);
        };

        self.refresh_if_aging(&entry);
        Ok(TierOutcome::from_regions(entry.regions.contains(region)))
    }
}

/// Fetches pickups from upstream for products the store has never seen,
/// persists them and splices them into the index.
pub struct LiveFetchStrategy {
    index: Arc<LocationIndex>,
    store: PickupStore,
    fetcher: Arc<dyn PickupFetcher>,
    concurrency: usize,
}

impl LiveFetchStrategy {
    #[must_use]
    pub fn new(
        index: Arc<LocationIndex>,
        store: PickupStore,
        fetcher: Arc<dyn PickupFetcher>,
        concurrency: usize,
    ) -> Self {
        Self {
            index,
            store,
            fetcher,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl ResolutionStrategy for LiveFetchStrategy {
    fn tier(&self) -> Tier {
        Tier::LiveFetch
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    async fn attempt(
        &self,
        product: &Product,
        region: &Region,
    ) -> Result<TierOutcome, ResolveError> {
        let code = &product.product_code;
        match self.store.get_or_fetch_file(code, self.fetcher.as_ref()).await {
            Ok(file) => {
                let matched = self
                    .index
                    .apply(code, Some(&file))
                    .is_some_and(|entry| entry.regions.contains(region));
                Ok(TierOutcome::from_regions(matched))
            }
            Err(StoreError::Fetch(e)) => {
                tracing::debug!(product_code = %code, error = %e, "live fetch tier unavailable");
                Ok(TierOutcome::Unavailable)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Reads the region off the product's own copy.
pub struct FreeTextStrategy {
    normalizer: Arc<LocationNormalizer>,
}

impl FreeTextStrategy {
    #[must_use]
    pub fn new(normalizer: Arc<LocationNormalizer>) -> Self {
        Self { normalizer }
    }
}

#[async_trait]
impl ResolutionStrategy for FreeTextStrategy {
    fn tier(&self) -> Tier {
        Tier::FreeText
    }

    async fn attempt(
        &self,
        product: &Product,
        region: &Region,
    ) -> Result<TierOutcome, ResolveError> {
        let regions = infer_regions(product, &self.normalizer);
        if regions.is_empty() {
            return Ok(TierOutcome::Unknown);
        }
        Ok(TierOutcome::from_regions(regions.contains(region)))
    }
}
