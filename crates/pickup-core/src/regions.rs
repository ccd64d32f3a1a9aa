//! Canonical pickup regions and the declarative table describing them.
//!
//! The table is plain data (`name`, `aliases`, `keywords`,
//! `exclude_keywords`) loaded once at startup, either from the built-in
//! defaults or a YAML file. Matching logic lives in [`crate::normalize`].

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Reserved input meaning "every region"; no table entry may use it.
pub const ALL_REGIONS: &str = "all";

/// A canonical region label. Only a [`RegionTable`] hands these out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRule {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
}

impl RegionRule {
    fn new(name: &str, aliases: &[&str], keywords: &[&str], exclude_keywords: &[&str]) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            name: name.to_string(),
            aliases: owned(aliases),
            keywords: owned(keywords),
            exclude_keywords: owned(exclude_keywords),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegionsFile {
    pub regions: Vec<RegionRule>,
}

/// A rule with every string case-folded, ready for matching.
#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    pub(crate) region: Region,
    pub(crate) folded_name: String,
    pub(crate) aliases: Vec<String>,
    pub(crate) keywords: Vec<String>,
    pub(crate) exclude_keywords: Vec<String>,
}

impl CompiledRule {
    pub(crate) fn is_excluded(&self, text: &str) -> bool {
        self.exclude_keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

/// The closed set of regions the service recognises, in priority order.
#[derive(Debug, Clone)]
pub struct RegionTable {
    rules: Vec<CompiledRule>,
}

impl RegionTable {
    /// Validates and compiles a list of rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when the list is empty, a name is
    /// blank, reserved or duplicated, or an alias points at two regions.
    pub fn new(rules: Vec<RegionRule>) -> Result<Self, ConfigError> {
        validate_rules(&rules)?;
        Ok(Self::compile(rules))
    }

    fn compile(rules: Vec<RegionRule>) -> Self {
        let fold_all = |items: Vec<String>| -> Vec<String> {
            items
                .iter()
                .map(|s| fold(s))
                .filter(|s| !s.is_empty())
                .collect()
        };

        let rules = rules
            .into_iter()
            .map(|rule| CompiledRule {
                folded_name: fold(&rule.name),
                region: Region(rule.name.trim().to_string()),
                aliases: fold_all(rule.aliases),
                keywords: fold_all(rule.keywords),
                exclude_keywords: fold_all(rule.exclude_keywords),
            })
            .collect();
        Self { rules }
    }

    /// Looks up a region by its canonical name, ignoring case.
    #[must_use]
    pub fn region(&self, name: &str) -> Option<Region> {
        let folded = fold(name);
        self.rules
            .iter()
            .find(|r| r.folded_name == folded)
            .map(|r| r.region.clone())
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.rules.iter().map(|r| &r.region)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub(crate) fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub(crate) fn rule_for(&self, region: &Region) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| &r.region == region)
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::compile(default_rules())
    }
}

/// Built-in South-East Queensland pickup regions.
///
/// Order matters: the keyword scan returns the first rule that fires, so
/// more specific regions with overlapping keywords come before the broad
/// ones they would otherwise be swallowed by.
#[must_use]
pub fn default_rules() -> Vec<RegionRule> {
    vec![
        RegionRule::new(
            "Brisbane Loop",
            &["city loop", "brisbane city loop", "cbd loop"],
            &["brisbane loop", "city loop", "cbd loop", "loop pickup", "loop bus"],
            &[],
        ),
        RegionRule::new(
            "Brisbane",
            &["brisbane cbd", "brisbane city", "bne", "brissie"],
            &[
                "brisbane",
                "roma street",
                "south bank",
                "southbank",
                "fortitude valley",
                "kangaroo point",
                "spring hill",
                "milton",
                "toowong",
            ],
            &["loop", "gold coast"],
        ),
        RegionRule::new(
            "Tamborine Mountain",
            &[
                "mt tamborine",
                "mount tamborine",
                "tamborine mtn",
                "tamborine",
                "north tamborine",
            ],
            &["tamborine", "eagle heights", "gallery walk"],
            &[],
        ),
        RegionRule::new(
            "Gold Coast",
            &["goldie", "gold coast city", "gc"],
            &[
                "gold coast",
                "surfers paradise",
                "broadbeach",
                "southport",
                "main beach",
                "burleigh",
                "coolangatta",
                "coomera",
                "helensvale",
                "mermaid beach",
                "runaway bay",
            ],
            &["tamborine"],
        ),
        RegionRule::new(
            "Sunshine Coast",
            &["sunny coast", "sunshine coast hinterland"],
            &[
                "sunshine coast",
                "noosa",
                "maroochydore",
                "mooloolaba",
                "caloundra",
                "coolum",
                "nambour",
            ],
            &[],
        ),
        RegionRule::new(
            "Byron Bay",
            &["byron"],
            &["byron bay", "byron", "bangalow", "ballina"],
            &[],
        ),
    ]
}

/// Load and validate a region table from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_regions(path: &Path) -> Result<RegionTable, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::RegionsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let file: RegionsFile = serde_yaml::from_str(&content)?;
    RegionTable::new(file.regions)
}

fn validate_rules(rules: &[RegionRule]) -> Result<(), ConfigError> {
    if rules.is_empty() {
        return Err(ConfigError::Validation(
            "region table must define at least one region".to_string(),
        ));
    }

    let mut seen_names = HashSet::new();
    for rule in rules {
        let folded = fold(&rule.name);
        if folded.is_empty() {
            return Err(ConfigError::Validation(
                "region name must be non-empty".to_string(),
            ));
        }
        if folded == ALL_REGIONS {
            return Err(ConfigError::Validation(format!(
                "region name '{}' is reserved",
                rule.name
            )));
        }
        if !seen_names.insert(folded) {
            return Err(ConfigError::Validation(format!(
                "duplicate region name: '{}'",
                rule.name
            )));
        }
    }

    let mut alias_owner: HashMap<String, &str> = HashMap::new();
    for rule in rules {
        for alias in &rule.aliases {
            let folded = fold(alias);
            if folded.is_empty() {
                continue;
            }
            if seen_names.contains(&folded) && folded != fold(&rule.name) {
                return Err(ConfigError::Validation(format!(
                    "alias '{alias}' of region '{}' is another region's name",
                    rule.name
                )));
            }
            if let Some(owner) = alias_owner.insert(folded, &rule.name) {
                if owner != rule.name {
                    return Err(ConfigError::Validation(format!(
                        "alias '{alias}' is claimed by both '{owner}' and '{}'",
                        rule.name
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Lowercases, trims and collapses internal whitespace.
pub(crate) fn fold(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[path = "regions_test.rs"]
mod tests;
