//! Durable per-product pickup cache.
//!
//! One JSON file per product code under a root directory. Reads never fail:
//! a missing or corrupt file is a cache miss (corrupt files are deleted on
//! sight). Writes are retried with linear backoff and are the only hard
//! failure this crate reports.

pub mod error;
pub mod paths;
pub mod refresh;
pub mod stats;
pub mod store;

mod retry;

pub use error::StoreError;
pub use paths::file_name_for;
pub use refresh::{RefreshObserver, RefreshStats};
pub use stats::{CleanupPolicy, CleanupReport, StoreStats};
pub use store::{PickupStore, StoreOptions};
