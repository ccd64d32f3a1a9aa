use pickup_store::StoreError;
use thiserror::Error;

/// The only failures a resolver caller ever sees. Missing data, corrupt
/// files, upstream outages and unknown regions all degrade the answer
/// instead of failing it.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
