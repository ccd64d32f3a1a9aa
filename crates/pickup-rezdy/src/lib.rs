//! Rezdy booking API client, limited to the product pickup list endpoint.

pub mod client;
pub mod error;
pub mod types;

mod retry;

pub use client::RezdyClient;
pub use error::RezdyError;
pub use types::{RezdyPickupLocation, RezdyPickupsResponse, RequestStatus};
