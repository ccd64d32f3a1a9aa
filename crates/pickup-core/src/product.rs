use serde::{Deserialize, Serialize};

/// A bookable tour product as supplied by the catalog.
///
/// Only the fields pickup resolution reads are modelled; everything else the
/// catalog carries is ignored on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_address: Option<String>,
}

impl Product {
    #[must_use]
    pub fn new(product_code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            product_code: product_code.into(),
            name: name.into(),
            short_description: None,
            description: None,
            location_address: None,
        }
    }

    #[must_use]
    pub fn with_short_description(mut self, short_description: impl Into<String>) -> Self {
        self.short_description = Some(short_description.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_location_address(mut self, address: impl Into<String>) -> Self {
        self.location_address = Some(address.into());
        self
    }

    /// Name and descriptions, in that order, skipping absent fields.
    pub fn descriptive_text(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(
            [&self.short_description, &self.description]
                .into_iter()
                .flatten()
                .map(String::as_str),
        )
    }
}
