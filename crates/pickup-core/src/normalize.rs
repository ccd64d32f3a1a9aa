//! Free-text location → canonical region mapping.
//!
//! [`LocationNormalizer::normalize`] applies four rules in strict priority
//! order and returns on the first hit:
//!
//! 1. exact (case-insensitive) match on a region's canonical name,
//! 2. alias table lookup,
//! 3. keyword scan, where any exclude keyword vetoes the region,
//! 4. substring containment in either direction against canonical names.
//!
//! `None` means "unknown", never "no pickup".

use std::collections::{BTreeSet, HashMap};

use crate::pickup::PickupRecord;
use crate::regions::{fold, Region, RegionTable};

/// Shortest candidate allowed to match as a fragment of a region name.
const MIN_PARTIAL_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct LocationNormalizer {
    table: RegionTable,
    aliases: HashMap<String, Region>,
}

impl LocationNormalizer {
    #[must_use]
    pub fn new(table: RegionTable) -> Self {
        let aliases = table
            .rules()
            .iter()
            .flat_map(|rule| {
                rule.aliases
                    .iter()
                    .map(move |alias| (alias.clone(), rule.region.clone()))
            })
            .collect();
        Self { table, aliases }
    }

    #[must_use]
    pub fn table(&self) -> &RegionTable {
        &self.table
    }

    /// Maps raw location text onto a canonical region.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> Option<Region> {
        let candidate = clean(raw);
        if candidate.is_empty() {
            return None;
        }

        let rules = self.table.rules();

        if let Some(rule) = rules.iter().find(|r| r.folded_name == candidate) {
            return Some(rule.region.clone());
        }

        if let Some(region) = self.aliases.get(&candidate) {
            return Some(region.clone());
        }

        if let Some(rule) = rules.iter().find(|r| {
            r.keywords.iter().any(|k| candidate.contains(k.as_str())) && !r.is_excluded(&candidate)
        }) {
            return Some(rule.region.clone());
        }

        rules
            .iter()
            .find(|r| {
                candidate.contains(r.folded_name.as_str())
                    || (candidate.len() >= MIN_PARTIAL_LEN
                        && r.folded_name.contains(candidate.as_str()))
            })
            .map(|r| r.region.clone())
    }

    /// Whether a pickup record belongs to `region`, judged on the record's
    /// name, address and instructions together.
    #[must_use]
    pub fn matches_region(&self, record: &PickupRecord, region: &Region) -> bool {
        let Some(rule) = self.table.rule_for(region) else {
            return false;
        };
        let text = clean(&record.search_text());
        let hit = text.contains(rule.folded_name.as_str())
            || rule.keywords.iter().any(|k| text.contains(k.as_str()));
        hit && !rule.is_excluded(&text)
    }

    /// Every region a record can be placed in: keyword matches over the
    /// whole record plus direct normalization of its name and address.
    #[must_use]
    pub fn regions_for_record(&self, record: &PickupRecord) -> BTreeSet<Region> {
        let mut regions: BTreeSet<Region> = self
            .table
            .regions()
            .filter(|region| self.matches_region(record, region))
            .cloned()
            .collect();

        regions.extend(self.normalize(&record.location_name));
        if let Some(address) = &record.address {
            regions.extend(self.normalize(address));
        }
        regions
    }
}

impl Default for LocationNormalizer {
    fn default() -> Self {
        Self::new(RegionTable::default())
    }
}

/// Replaces punctuation with spaces, then case-folds.
fn clean(raw: &str) -> String {
    let spaced: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '-' | '\'' | '&') {
                c
            } else {
                ' '
            }
        })
        .collect();
    fold(&spaced)
}
