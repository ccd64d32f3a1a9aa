//! Shared domain types for the pickup resolution workspace.
//!
//! Holds the durable data model, the canonical region table and the
//! [`LocationNormalizer`] that maps free text onto it, the clock
//! abstraction, the upstream fetcher contract, and environment-driven
//! configuration.

pub mod app_config;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod pickup;
pub mod product;
pub mod regions;

pub use app_config::{AppConfig, Environment};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_app_config, load_app_config_from_env};
pub use error::ConfigError;
pub use fetcher::{FetchError, PickupFetcher};
pub use normalize::LocationNormalizer;
pub use pickup::{Freshness, PickupRecord, PickupSource, ProductPickupFile, StalenessPolicy};
pub use product::Product;
pub use regions::{load_regions, Region, RegionRule, RegionTable, RegionsFile, ALL_REGIONS};
