//! Durable pickup data model.
//!
//! The serde shapes here are the on-disk format: one JSON document per
//! product, camelCase keys, optional fields omitted when absent.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// One physical pickup point offered for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupRecord {
    pub location_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// How many minutes before departure guests must be at the pickup point.
    #[serde(
        rename = "minutesPrior",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub minutes_prior_to_departure: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,
}

impl PickupRecord {
    #[must_use]
    pub fn new(location_name: impl Into<String>) -> Self {
        Self {
            location_name: location_name.into(),
            address: None,
            latitude: None,
            longitude: None,
            minutes_prior_to_departure: None,
            additional_instructions: None,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.additional_instructions = Some(instructions.into());
        self
    }

    /// Lowercased `locationName + address + additionalInstructions`, the text
    /// region matching runs against.
    #[must_use]
    pub fn search_text(&self) -> String {
        let mut text = self.location_name.to_lowercase();
        for part in [&self.address, &self.additional_instructions]
            .into_iter()
            .flatten()
        {
            text.push(' ');
            text.push_str(&part.to_lowercase());
        }
        text
    }
}

/// Where a [`ProductPickupFile`]'s records came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PickupSource {
    #[serde(rename = "rezdy_api", alias = "upstream_api")]
    UpstreamApi,
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "imported")]
    Imported,
}

impl std::fmt::Display for PickupSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PickupSource::UpstreamApi => write!(f, "rezdy_api"),
            PickupSource::Manual => write!(f, "manual"),
            PickupSource::Imported => write!(f, "imported"),
        }
    }
}

impl std::str::FromStr for PickupSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rezdy_api" | "upstream_api" => Ok(PickupSource::UpstreamApi),
            "manual" => Ok(PickupSource::Manual),
            "imported" => Ok(PickupSource::Imported),
            other => Err(format!("unknown pickup source '{other}'")),
        }
    }
}

/// The unit of durable storage: every known pickup point for one product.
///
/// An empty `pickups` list means the product is confirmed to have no pickup
/// service, which is different from having no file at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPickupFile {
    pub product_code: String,
    pub pickups: Vec<PickupRecord>,
    pub fetched_at: DateTime<Utc>,
    pub source: PickupSource,
    #[serde(rename = "lastAccessed", default, skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u64,
}

impl ProductPickupFile {
    #[must_use]
    pub fn new(
        product_code: impl Into<String>,
        pickups: Vec<PickupRecord>,
        source: PickupSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            product_code: product_code.into(),
            pickups,
            fetched_at: now,
            source,
            last_accessed_at: Some(now),
            access_count: 1,
        }
    }

    /// Last read time, falling back to the fetch time for files written
    /// without access stats.
    #[must_use]
    pub fn last_accessed(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.fetched_at)
    }

    /// Swap in newly fetched pickups. Access stats carry over.
    pub fn refresh(
        &mut self,
        pickups: Vec<PickupRecord>,
        source: PickupSource,
        now: DateTime<Utc>,
    ) {
        self.pickups = pickups;
        self.source = source;
        self.fetched_at = now;
    }

    /// Record a read.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = Some(now);
        self.access_count = self.access_count.saturating_add(1);
    }

    #[must_use]
    pub fn has_pickups(&self) -> bool {
        !self.pickups.is_empty()
    }
}

/// Age class of a cached file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Freshness::Fresh => write!(f, "fresh"),
            Freshness::Stale => write!(f, "stale"),
            Freshness::Expired => write!(f, "expired"),
        }
    }
}

/// Age thresholds separating fresh, stale and expired data.
///
/// `age < stale_after` is fresh, `stale_after <= age <= expire_after` is
/// stale, anything older is expired. Files dated in the future count as fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    stale_after: TimeDelta,
    expire_after: TimeDelta,
}

impl StalenessPolicy {
    /// Builds a policy, clamping `expire_after` up to `stale_after` if needed.
    #[must_use]
    pub fn new(stale_after: TimeDelta, expire_after: TimeDelta) -> Self {
        Self {
            stale_after,
            expire_after: expire_after.max(stale_after),
        }
    }

    #[must_use]
    pub fn from_secs(stale_after_secs: u64, expire_after_secs: u64) -> Self {
        let to_delta = |secs: u64| {
            i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX)
        };
        Self::new(to_delta(stale_after_secs), to_delta(expire_after_secs))
    }

    #[must_use]
    pub fn stale_after(&self) -> TimeDelta {
        self.stale_after
    }

    #[must_use]
    pub fn expire_after(&self) -> TimeDelta {
        self.expire_after
    }

    #[must_use]
    pub fn classify(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> Freshness {
        let age = now.signed_duration_since(fetched_at);
        if age < self.stale_after {
            Freshness::Fresh
        } else if age <= self.expire_after {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self::new(TimeDelta::hours(12), TimeDelta::hours(24))
    }
}
