use pickup_core::FetchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The fetcher produced no data; any cached file is left untouched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Persisting a file failed on every attempt.
    #[error("failed to write pickups for {product_code} after {attempts} attempt(s): {source}")]
    Write {
        product_code: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("store I/O error during {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// `true` for infrastructure failures that no fallback can paper over.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StoreError::Fetch(_))
    }
}
