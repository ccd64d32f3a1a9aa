//! The consumer-facing pickup resolver.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use pickup_core::{
    AppConfig, LocationNormalizer, PickupFetcher, Product, Region, ALL_REGIONS,
};
use pickup_store::{CleanupPolicy, CleanupReport, PickupStore, RefreshStats, StoreStats};
use serde::Serialize;

use crate::error::ResolveError;
use crate::index::{IndexMetadata, LocationIndex};
use crate::strategy::{
    FreeTextStrategy, IndexStrategy, LiveFetchStrategy, ResolutionStrategy, Tier, TierOutcome,
};

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Bounded concurrency for the live-fetch tier and `preload`.
    pub batch_size: usize,
}

impl ResolverOptions {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.preload_batch_size,
        }
    }
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self { batch_size: 5 }
    }
}

/// Per-request tier switches.
#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    pub live_fetch: bool,
    pub text_fallback: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            live_fetch: true,
            text_fallback: true,
        }
    }
}

impl FilterOptions {
    fn allows(self, tier: Tier) -> bool {
        match tier {
            Tier::Index => true,
            Tier::LiveFetch => self.live_fetch,
            Tier::FreeText => self.text_fallback,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    High,
    Medium,
    Low,
}

/// Where the answer for a filter request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    LocalFiles,
    UpstreamApi,
    TextAnalysis,
    Mixed,
    Unfiltered,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCounts {
    /// Products this tier gave a definite answer for.
    pub resolved: usize,
    /// Of those, how many serve the region.
    pub matched: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStats {
    pub region: Option<Region>,
    pub total: usize,
    pub matched: usize,
    /// Products no tier could place.
    pub unresolved: usize,
    pub upstream_failures: usize,
    pub tiers: BTreeMap<Tier, TierCounts>,
    pub accuracy: Accuracy,
    pub data_source: DataSource,
}

impl FilterStats {
    fn unfiltered(total: usize) -> Self {
        Self {
            region: None,
            total,
            matched: total,
            unresolved: 0,
            upstream_failures: 0,
            tiers: BTreeMap::new(),
            accuracy: Accuracy::High,
            data_source: DataSource::Unfiltered,
        }
    }

    fn unknown_region(total: usize) -> Self {
        Self {
            region: None,
            total,
            matched: 0,
            unresolved: total,
            upstream_failures: 0,
            tiers: BTreeMap::new(),
            accuracy: Accuracy::Low,
            data_source: DataSource::None,
        }
    }
}

/// Answer to a single-product pickup question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupCheck {
    pub has_pickup: bool,
    /// Tier that decided; `None` when nothing could.
    pub method: Option<Tier>,
    pub confidence: Accuracy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreloadReport {
    /// Distinct product codes asked for; repeats are fetched once.
    pub requested: usize,
    pub already_cached: usize,
    pub fetched: usize,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub filter_requests: u64,
    pub point_checks: u64,
    pub resolutions: BTreeMap<Tier, u64>,
    pub unresolved: u64,
    #[serde(flatten)]
    pub refresh: RefreshStats,
}

#[derive(Debug, Default)]
struct Counters {
    filter_requests: AtomicU64,
    point_checks: AtomicU64,
    index: AtomicU64,
    live_fetch: AtomicU64,
    free_text: AtomicU64,
    unresolved: AtomicU64,
}

impl Counters {
    fn for_tier(&self, tier: Tier) -> &AtomicU64 {
        match tier {
            Tier::Index => &self.index,
            Tier::LiveFetch => &self.live_fetch,
            Tier::FreeText => &self.free_text,
        }
    }
}

/// Resolves which products pick up in which regions.
///
/// Owns the region index and the ordered tier chain. Construct one per
/// process and share it; every method takes `&self`.
pub struct PickupResolver {
    store: PickupStore,
    normalizer: Arc<LocationNormalizer>,
    index: Arc<LocationIndex>,
    fetcher: Option<Arc<dyn PickupFetcher>>,
    strategies: Vec<Box<dyn ResolutionStrategy>>,
    batch_size: usize,
    counters: Counters,
}

impl PickupResolver {
    /// Resolver with the standard chain: index, then live fetch (when a
    /// fetcher is given), then free text.
    #[must_use]
    pub fn new(
        store: PickupStore,
        normalizer: LocationNormalizer,
        fetcher: Option<Arc<dyn PickupFetcher>>,
        options: ResolverOptions,
    ) -> Self {
        let normalizer = Arc::new(normalizer);
        let index = Arc::new(LocationIndex::new(store.clone(), Arc::clone(&normalizer)));
        let batch_size = options.batch_size.max(1);

        let mut strategies: Vec<Box<dyn ResolutionStrategy>> = vec![Box::new(
            IndexStrategy::new(Arc::clone(&index), store.clone(), fetcher.clone()),
        )];
        if let Some(fetcher) = &fetcher {
            strategies.push(Box::new(LiveFetchStrategy::new(
                Arc::clone(&index),
                store.clone(),
                Arc::clone(fetcher),
                batch_size,
            )));
        }
        strategies.push(Box::new(FreeTextStrategy::new(Arc::clone(&normalizer))));

        Self {
            store,
            normalizer,
            index,
            fetcher,
            strategies,
            batch_size,
            counters: Counters::default(),
        }
    }

    /// Replaces the tier chain.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn ResolutionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    #[must_use]
    pub fn index(&self) -> &Arc<LocationIndex> {
        &self.index
    }

    #[must_use]
    pub fn normalizer(&self) -> &LocationNormalizer {
        &self.normalizer
    }

    #[must_use]
    pub fn store(&self) -> &PickupStore {
        &self.store
    }

    /// Products that pick up in `region`, in input order.
    ///
    /// `"all"` (any case) or a blank region returns every product. A region
    /// that cannot be normalized returns nothing with low accuracy.
    ///
    /// # Errors
    ///
    /// Only [`ResolveError::Store`] for failures no tier can recover from,
    /// such as a store that cannot be written.
    pub async fn filter_by_region(
        &self,
        products: &[Product],
        region: &str,
        options: FilterOptions,
    ) -> Result<(Vec<Product>, FilterStats), ResolveError> {
        self.counters.filter_requests.fetch_add(1, Ordering::Relaxed);

        if is_all(region) {
            return Ok((products.to_vec(), FilterStats::unfiltered(products.len())));
        }
        let Some(target) = self.normalizer.normalize(region) else {
            tracing::warn!(region, "region could not be normalized, nothing matches");
            return Ok((Vec::new(), FilterStats::unknown_region(products.len())));
        };

        self.index.ensure_built().await?;

        let mut unresolved: Vec<usize> = (0..products.len()).collect();
        let mut matched: BTreeSet<usize> = BTreeSet::new();
        let mut tiers: BTreeMap<Tier, TierCounts> = BTreeMap::new();
        let mut upstream_failures = 0usize;

        for strategy in &self.strategies {
            if unresolved.is_empty() {
                break;
            }
            let tier = strategy.tier();
            if !options.allows(tier) {
                continue;
            }

            let outcomes = run_tier(strategy.as_ref(), products, &unresolved, &target).await?;
            let mut counts = TierCounts::default();
            let mut still_unresolved = Vec::new();
            for (i, outcome) in outcomes {
                match outcome {
                    TierOutcome::Matched => {
                        counts.resolved += 1;
                        counts.matched += 1;
                        matched.insert(i);
                    }
                    TierOutcome::NotMatched => counts.resolved += 1,
                    TierOutcome::Unavailable => {
                        upstream_failures += 1;
                        still_unresolved.push(i);
                    }
                    TierOutcome::Unknown => still_unresolved.push(i),
                }
            }
            still_unresolved.sort_unstable();
            unresolved = still_unresolved;

            self.counters
                .for_tier(tier)
                .fetch_add(counts.resolved as u64, Ordering::Relaxed);
            tracing::debug!(
                region = %target,
                %tier,
                resolved = counts.resolved,
                matched = counts.matched,
                remaining = unresolved.len(),
                "resolution tier finished"
            );
            tiers.insert(tier, counts);
        }
        self.counters
            .unresolved
            .fetch_add(unresolved.len() as u64, Ordering::Relaxed);

        let filtered: Vec<Product> = matched.iter().map(|&i| products[i].clone()).collect();
        let stats = FilterStats {
            accuracy: accuracy_for(&tiers, filtered.len(), unresolved.len()),
            data_source: data_source_for(&tiers),
            region: Some(target),
            total: products.len(),
            matched: filtered.len(),
            unresolved: unresolved.len(),
            upstream_failures,
            tiers,
        };
        tracing::info!(
            region = %region,
            total = stats.total,
            matched = stats.matched,
            accuracy = ?stats.accuracy,
            "filtered products by region"
        );
        Ok((filtered, stats))
    }

    /// Whether one product picks up from `location`, using the first tier
    /// that can decide.
    ///
    /// # Errors
    ///
    /// Only [`ResolveError::Store`] for unrecoverable store failures.
    pub async fn has_pickup_from_location(
        &self,
        product: &Product,
        location: &str,
        options: FilterOptions,
    ) -> Result<PickupCheck, ResolveError> {
        self.counters.point_checks.fetch_add(1, Ordering::Relaxed);

        if is_all(location) {
            return Ok(PickupCheck {
                has_pickup: true,
                method: None,
                confidence: Accuracy::High,
            });
        }
        let Some(target) = self.normalizer.normalize(location) else {
            return Ok(PickupCheck {
                has_pickup: false,
                method: None,
                confidence: Accuracy::Low,
            });
        };

        self.index.ensure_built().await?;

        for strategy in &self.strategies {
            let tier = strategy.tier();
            if !options.allows(tier) {
                continue;
            }
            let outcome = strategy.attempt(product, &target).await?;
            if outcome.is_resolved() {
                self.counters.for_tier(tier).fetch_add(1, Ordering::Relaxed);
                return Ok(PickupCheck {
                    has_pickup: outcome == TierOutcome::Matched,
                    method: Some(tier),
                    confidence: if tier == Tier::FreeText {
                        Accuracy::Medium
                    } else {
                        Accuracy::High
                    },
                });
            }
        }

        self.counters.unresolved.fetch_add(1, Ordering::Relaxed);
        Ok(PickupCheck {
            has_pickup: false,
            method: None,
            confidence: Accuracy::Low,
        })
    }

    /// Fetches pickups for every code the store has no data for, at most
    /// `batch_size` at a time. Individual failures are logged and reported,
    /// never propagated.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Store`] only if the initial index build fails.
    pub async fn preload(&self, product_codes: &[String]) -> Result<PreloadReport, ResolveError> {
        self.index.ensure_built().await?;

        let mut seen = HashSet::new();
        let product_codes: Vec<&String> = product_codes
            .iter()
            .filter(|code| seen.insert(code.as_str()))
            .collect();
        let mut report = PreloadReport {
            requested: product_codes.len(),
            ..PreloadReport::default()
        };

        let mut missing = Vec::new();
        for code in product_codes {
            let known = self.index.entry(code).is_some() || self.index.refresh_one(code).await.is_some();
            if known {
                report.already_cached += 1;
            } else {
                missing.push(code.as_str());
            }
        }

        let Some(fetcher) = &self.fetcher else {
            if !missing.is_empty() {
                tracing::warn!(
                    missing = missing.len(),
                    "preload skipped: no upstream client configured"
                );
            }
            report.failed = missing.into_iter().map(str::to_string).collect();
            return Ok(report);
        };

        let results: Vec<(&str, bool)> = stream::iter(missing)
            .map(|code| async move {
                match self.store.get_or_fetch_file(code, fetcher.as_ref()).await {
                    Ok(file) => {
                        self.index.apply(code, Some(&file));
                        (code, true)
                    }
                    Err(e) => {
                        tracing::warn!(product_code = code, error = %e, "preload fetch failed");
                        (code, false)
                    }
                }
            })
            .buffer_unordered(self.batch_size)
            .collect()
            .await;

        for (code, ok) in results {
            if ok {
                report.fetched += 1;
            } else {
                report.failed.push(code.to_string());
            }
        }
        report.failed.sort();

        tracing::info!(
            requested = report.requested,
            already_cached = report.already_cached,
            fetched = report.fetched,
            failed = report.failed.len(),
            "preload complete"
        );
        Ok(report)
    }

    /// Evicts stored files under `policy` and drops them from the index.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Store`] if the store cannot be listed or a
    /// file cannot be deleted.
    pub async fn cleanup(&self, policy: CleanupPolicy) -> Result<CleanupReport, ResolveError> {
        let report = self.store.cleanup(policy).await?;
        for code in &report.removed {
            self.index.refresh_one(code).await;
        }
        Ok(report)
    }

    /// Rebuilds the index from the store.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Store`] if the store cannot be listed.
    pub async fn rebuild_index(&self) -> Result<IndexMetadata, ResolveError> {
        Ok(self.index.build().await?)
    }

    /// Counts files on disk by freshness. Read-only.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Store`] if the store cannot be listed.
    pub async fn store_stats(&self) -> Result<StoreStats, ResolveError> {
        Ok(self.store.stats().await?)
    }

    #[must_use]
    pub fn index_metadata(&self) -> IndexMetadata {
        self.index.metadata()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            filter_requests: c.filter_requests.load(Ordering::Relaxed),
            point_checks: c.point_checks.load(Ordering::Relaxed),
            resolutions: [Tier::Index, Tier::LiveFetch, Tier::FreeText]
                .into_iter()
                .map(|tier| (tier, c.for_tier(tier).load(Ordering::Relaxed)))
                .collect(),
            unresolved: c.unresolved.load(Ordering::Relaxed),
            refresh: self.store.refresh_stats(),
        }
    }
}

/// Runs one tier over the still-unresolved products with the tier's own
/// concurrency bound. Identical products listed more than once are
/// attempted once and share the outcome.
async fn run_tier(
    strategy: &dyn ResolutionStrategy,
    products: &[Product],
    unresolved: &[usize],
    region: &Region,
) -> Result<Vec<(usize, TierOutcome)>, ResolveError> {
    let groups = group_duplicates(products, unresolved);
    let results: Vec<(&[usize], Result<TierOutcome, ResolveError>)> =
        stream::iter(groups.iter())
            .map(|members| async move {
                (
                    members.as_slice(),
                    strategy.attempt(&products[members[0]], region).await,
                )
            })
            .buffer_unordered(strategy.concurrency().max(1))
            .collect()
            .await;

    let mut outcomes = Vec::with_capacity(unresolved.len());
    for (members, outcome) in results {
        let outcome = outcome?;
        outcomes.extend(members.iter().map(|&i| (i, outcome)));
    }
    Ok(outcomes)
}

/// Buckets product indices so equal products share one bucket. Each
/// bucket is non-empty and keeps first-seen order.
fn group_duplicates(products: &[Product], indices: &[usize]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut by_code: HashMap<&str, Vec<usize>> = HashMap::new();
    for &i in indices {
        let product = &products[i];
        let candidates = by_code.entry(product.product_code.as_str()).or_default();
        let existing = candidates
            .iter()
            .copied()
            .find(|&g| products[groups[g][0]] == *product);
        match existing {
            Some(g) => groups[g].push(i),
            None => {
                candidates.push(groups.len());
                groups.push(vec![i]);
            }
        }
    }
    groups
}

fn is_all(region: &str) -> bool {
    let region = region.trim();
    region.is_empty() || region.eq_ignore_ascii_case(ALL_REGIONS)
}

/// High when every answer came from stored or fetched pickup data, medium
/// when product copy had to be read, low when nothing matched and some
/// products could not be placed at all.
fn accuracy_for(tiers: &BTreeMap<Tier, TierCounts>, matched: usize, unresolved: usize) -> Accuracy {
    let text_resolved = tiers.get(&Tier::FreeText).is_some_and(|c| c.resolved > 0);
    if matched == 0 && unresolved > 0 {
        Accuracy::Low
    } else if text_resolved {
        Accuracy::Medium
    } else {
        Accuracy::High
    }
}

fn data_source_for(tiers: &BTreeMap<Tier, TierCounts>) -> DataSource {
    let contributing: Vec<Tier> = tiers
        .iter()
        .filter(|(_, counts)| counts.resolved > 0)
        .map(|(tier, _)| *tier)
        .collect();
    match contributing.as_slice() {
        [] => DataSource::None,
        [Tier::Index] => DataSource::LocalFiles,
        [Tier::LiveFetch] => DataSource::UpstreamApi,
        [Tier::FreeText] => DataSource::TextAnalysis,
        _ => DataSource::Mixed,
    }
}

#[cfg(test)]
#[path = "resolver_test.rs"]
mod tests;
