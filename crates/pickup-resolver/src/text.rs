//! Region inference from product copy, for products with no pickup data.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use pickup_core::{LocationNormalizer, Product, Region};
use regex::Regex;

/// "departs from X", "pickup from X", "transfers from X", "starts at X" ...
/// The capture runs to the next clause break.
static LOCATION_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:depart(?:s|ing|ures?)?|leav(?:es|ing)|start(?:s|ing)?|pick\s*-?\s*ups?|collection|transfers?)\s+(?:is\s+|are\s+)?(?:available\s+)?(?:from|at|in)\s+([^.,;:!?\n()]{2,60})",
    )
    .expect("valid location phrase regex")
});

/// Location phrases mentioned in free text, trimmed, in order of appearance.
#[must_use]
pub fn extract_location_phrases(text: &str) -> Vec<String> {
    LOCATION_PHRASE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|phrase| !phrase.is_empty())
        .collect()
}

/// Regions a product's own copy claims to serve: location phrases in its
/// name and descriptions, its meeting address, and its title.
#[must_use]
pub fn infer_regions(product: &Product, normalizer: &LocationNormalizer) -> BTreeSet<Region> {
    let mut regions = BTreeSet::new();

    for text in product.descriptive_text() {
        for phrase in extract_location_phrases(text) {
            regions.extend(normalizer.normalize(&phrase));
        }
    }
    if let Some(address) = &product.location_address {
        regions.extend(normalizer.normalize(address));
    }
    regions.extend(normalizer.normalize(&product.name));

    regions
}
