//! In-memory region index over the pickup store.
//!
//! The forward map (`product → regions`) and its inverse (`region →
//! products`) live together in one [`IndexSnapshot`]. Readers clone an `Arc`
//! to the current snapshot and never see the two maps disagree: a full
//! [`build`](LocationIndex::build) swaps in a new snapshot, and a
//! single-product update splices a copy and swaps that in.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use pickup_core::{LocationNormalizer, ProductPickupFile, Region};
use pickup_store::{PickupStore, RefreshObserver, StoreError};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub product_code: String,
    pub regions: BTreeSet<Region>,
    pub pickup_count: usize,
    pub fetched_at: DateTime<Utc>,
}

/// Answer to "does this product pick up in this region?".
///
/// `has_data = false` means the store knows nothing about the product and
/// the caller should look elsewhere. `has_data = true, matched = false` is an
/// authoritative negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionMatch {
    pub matched: bool,
    pub has_data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub built_at: Option<DateTime<Utc>>,
    /// Products with a stored pickup file, empty or not.
    pub total_products: usize,
    /// Products whose stored list has at least one pickup.
    pub products_with_pickups: usize,
    /// Product count per region.
    pub regions_present: BTreeMap<Region, usize>,
}

/// Immutable view of the index at one point in time.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    forward: HashMap<String, IndexEntry>,
    reverse: HashMap<Region, BTreeSet<String>>,
    built_at: Option<DateTime<Utc>>,
}

impl IndexSnapshot {
    #[must_use]
    pub fn entry(&self, product_code: &str) -> Option<&IndexEntry> {
        self.forward.get(product_code)
    }

    #[must_use]
    pub fn products_in_region(&self, region: &Region) -> Vec<String> {
        self.reverse
            .get(region)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_region(&self, product_code: &str, region: &Region) -> RegionMatch {
        match self.forward.get(product_code) {
            Some(entry) => RegionMatch {
                matched: entry.regions.contains(region),
                has_data: true,
            },
            None => RegionMatch {
                matched: false,
                has_data: false,
            },
        }
    }

    #[must_use]
    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    #[must_use]
    pub fn metadata(&self) -> IndexMetadata {
        IndexMetadata {
            built_at: self.built_at,
            total_products: self.forward.len(),
            products_with_pickups: self
                .forward
                .values()
                .filter(|e| e.pickup_count > 0)
                .count(),
            regions_present: self
                .reverse
                .iter()
                .map(|(region, codes)| (region.clone(), codes.len()))
                .collect(),
        }
    }

    /// Replaces one product's entry in both maps. `None` removes it.
    fn splice(&mut self, product_code: &str, entry: Option<IndexEntry>) {
        if let Some(old) = self.forward.remove(product_code) {
            for region in &old.regions {
                if let Some(codes) = self.reverse.get_mut(region) {
                    codes.remove(product_code);
                    if codes.is_empty() {
                        self.reverse.remove(region);
                    }
                }
            }
        }

        if let Some(entry) = entry {
            for region in &entry.regions {
                self.reverse
                    .entry(region.clone())
                    .or_default()
                    .insert(product_code.to_string());
            }
            self.forward.insert(product_code.to_string(), entry);
        }
    }
}

/// Region index owned by a resolver.
#[derive(Debug)]
pub struct LocationIndex {
    store: PickupStore,
    normalizer: Arc<LocationNormalizer>,
    current: RwLock<Arc<IndexSnapshot>>,
}

impl LocationIndex {
    #[must_use]
    pub fn new(store: PickupStore, normalizer: Arc<LocationNormalizer>) -> Self {
        Self {
            store,
            normalizer,
            current: RwLock::new(Arc::new(IndexSnapshot::default())),
        }
    }

    /// The current snapshot. Cheap; holds the lock only to clone an `Arc`.
    #[must_use]
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Rebuilds the whole index from the store and publishes it in one swap.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store directory cannot be listed.
    pub async fn build(&self) -> Result<IndexMetadata, StoreError> {
        let files = self.store.scan().await?;
        let snapshot = self.assemble(&files, Some(self.store.now()));
        let metadata = snapshot.metadata();

        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);

        tracing::info!(
            products = metadata.total_products,
            regions = metadata.regions_present.len(),
            "location index built"
        );
        Ok(metadata)
    }

    /// What a build would report right now, computed without publishing a
    /// snapshot or deleting corrupt files. `built_at` is that of the live
    /// index, `None` if it was never built.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store directory cannot be listed.
    pub async fn survey(&self) -> Result<IndexMetadata, StoreError> {
        let files = self.store.scan_read_only().await?;
        Ok(self.assemble(&files, self.snapshot().built_at).metadata())
    }

    fn assemble(
        &self,
        files: &[ProductPickupFile],
        built_at: Option<DateTime<Utc>>,
    ) -> IndexSnapshot {
        let mut snapshot = IndexSnapshot {
            built_at,
            ..IndexSnapshot::default()
        };
        for file in files {
            snapshot.splice(&file.product_code, Some(self.derive_entry(file)));
        }
        snapshot
    }

    /// Builds the index unless a build has already completed.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub async fn ensure_built(&self) -> Result<(), StoreError> {
        if self.snapshot().built_at.is_none() {
            self.build().await?;
        }
        Ok(())
    }

    /// Re-derives one product from its stored file without touching access
    /// stats. A product whose file is gone is dropped from the index.
    pub async fn refresh_one(&self, product_code: &str) -> Option<IndexEntry> {
        let file = self.store.peek(product_code).await;
        self.apply(product_code, file.as_ref())
    }

    /// Splices a product's entry from an already-loaded file.
    pub fn apply(
        &self,
        product_code: &str,
        file: Option<&ProductPickupFile>,
    ) -> Option<IndexEntry> {
        let entry = file.map(|f| self.derive_entry(f));

        {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::make_mut(&mut current).splice(product_code, entry.clone());
        }

        tracing::debug!(
            product_code,
            regions = ?entry.as_ref().map(|e| &e.regions),
            "location index entry refreshed"
        );
        entry
    }

    #[must_use]
    pub fn entry(&self, product_code: &str) -> Option<IndexEntry> {
        self.snapshot().entry(product_code).cloned()
    }

    #[must_use]
    pub fn products_in_region(&self, region: &Region) -> Vec<String> {
        self.snapshot().products_in_region(region)
    }

    #[must_use]
    pub fn has_region(&self, product_code: &str, region: &Region) -> RegionMatch {
        self.snapshot().has_region(product_code, region)
    }

    #[must_use]
    pub fn metadata(&self) -> IndexMetadata {
        self.snapshot().metadata()
    }

    fn derive_entry(&self, file: &ProductPickupFile) -> IndexEntry {
        let regions = file
            .pickups
            .iter()
            .flat_map(|record| self.normalizer.regions_for_record(record))
            .collect();
        IndexEntry {
            product_code: file.product_code.clone(),
            regions,
            pickup_count: file.pickups.len(),
            fetched_at: file.fetched_at,
        }
    }
}

impl RefreshObserver for LocationIndex {
    fn pickups_refreshed(&self, file: &ProductPickupFile) {
        self.apply(&file.product_code, Some(file));
    }
}

#[cfg(test)]
#[path = "index_test.rs"]
mod tests;
