//! Pickup resolution: "which of these products pick up in this region?"
//!
//! [`PickupResolver`] answers from an in-memory [`LocationIndex`] over the
//! pickup store, falls back to fetching unseen products from upstream, and
//! finally to reading regions out of product copy. Each fallback is a
//! [`ResolutionStrategy`] in an ordered chain.

pub mod error;
pub mod index;
pub mod resolver;
pub mod strategy;
pub mod text;

pub use error::ResolveError;
pub use index::{IndexEntry, IndexMetadata, IndexSnapshot, LocationIndex, RegionMatch};
pub use resolver::{
    Accuracy, CacheStats, DataSource, FilterOptions, FilterStats, PickupCheck, PickupResolver,
    PreloadReport, ResolverOptions, TierCounts,
};
pub use strategy::{
    FreeTextStrategy, IndexStrategy, LiveFetchStrategy, ResolutionStrategy, Tier, TierOutcome,
};
