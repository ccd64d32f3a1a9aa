//! Resolution command handlers: `filter`, `check` and `preload`.

use std::path::Path;

use anyhow::Context;
use pickup_core::Product;
use pickup_resolver::{FilterOptions, PickupResolver};
use serde::Serialize;

use crate::print_json;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FilterOutput<'a> {
    products: &'a [Product],
    stats: &'a pickup_resolver::FilterStats,
}

pub(crate) fn filter_options(no_live_fetch: bool, no_text: bool) -> FilterOptions {
    FilterOptions {
        live_fetch: !no_live_fetch,
        text_fallback: !no_text,
    }
}

/// Reads a JSON array of products.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a product array.
pub(crate) fn read_products(path: &Path) -> anyhow::Result<Vec<Product>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read products from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of products", path.display()))
}

/// Finds `code` in an optional product file, falling back to a bare product
/// with no descriptive text.
pub(crate) fn lookup_product(code: &str, products: Option<&Path>) -> anyhow::Result<Product> {
    let Some(path) = products else {
        return Ok(Product::new(code, ""));
    };
    let found = read_products(path)?
        .into_iter()
        .find(|p| p.product_code == code);
    if found.is_none() {
        tracing::warn!(product_code = code, file = %path.display(), "product not in file, checking by code only");
    }
    Ok(found.unwrap_or_else(|| Product::new(code, "")))
}

pub(crate) async fn run_filter(
    resolver: &PickupResolver,
    region: &str,
    products_path: &Path,
    options: FilterOptions,
) -> anyhow::Result<()> {
    let products = read_products(products_path)?;
    let (filtered, stats) = resolver
        .filter_by_region(&products, region, options)
        .await?;
    print_json(&FilterOutput {
        products: &filtered,
        stats: &stats,
    })
}

pub(crate) async fn run_check(
    resolver: &PickupResolver,
    code: &str,
    location: &str,
    products_path: Option<&Path>,
    options: FilterOptions,
) -> anyhow::Result<()> {
    let product = lookup_product(code, products_path)?;
    let check = resolver
        .has_pickup_from_location(&product, location, options)
        .await?;
    print_json(&check)
}

pub(crate) async fn run_preload(resolver: &PickupResolver, codes: &[String]) -> anyhow::Result<()> {
    let report = resolver.preload(codes).await?;
    print_json(&report)
}
