mod cache;
mod resolve;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pickup_core::{AppConfig, LocationNormalizer, PickupFetcher, RegionTable};
use pickup_resolver::{PickupResolver, ResolverOptions};
use pickup_rezdy::RezdyClient;
use pickup_store::{PickupStore, StoreOptions};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pickup-cli")]
#[command(about = "Pickup location cache and region resolver")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Filter a product list down to those picking up in a region
    Filter {
        /// Region name or alias; "all" returns every product
        #[arg(long)]
        region: String,
        /// JSON file holding an array of products
        #[arg(long)]
        products: PathBuf,
        /// Never call the upstream API for missing products
        #[arg(long)]
        no_live_fetch: bool,
        /// Skip the product description fallback
        #[arg(long)]
        no_text: bool,
    },
    /// Check whether one product picks up from a location
    Check {
        /// Product code
        #[arg(long)]
        product: String,
        /// Location, region name or alias
        #[arg(long)]
        location: String,
        /// JSON product list to read the product's descriptions from
        #[arg(long)]
        products: Option<PathBuf>,
        #[arg(long)]
        no_live_fetch: bool,
    },
    /// Fetch and store pickups for products not yet cached
    Preload {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// Store, index and resolver statistics
    Stats,
    /// Rebuild the region index from the store
    RebuildIndex,
    /// Remove old or rarely read pickup files
    Cleanup {
        /// Remove files fetched more than this many hours ago
        #[arg(long)]
        max_age_hours: Option<i64>,
        /// Remove files read fewer than this many times
        #[arg(long)]
        min_access: Option<u64>,
    },
    /// Seed the store from a JSON object of product code to pickup list
    Import { file: PathBuf },
    /// List configured regions
    Regions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = pickup_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("pickup-cli ready; run with --help for commands");
        return Ok(());
    };

    let resolver = build_resolver(&config)?;
    match command {
        Commands::Filter {
            region,
            products,
            no_live_fetch,
            no_text,
        } => {
            let options = resolve::filter_options(no_live_fetch, no_text);
            resolve::run_filter(&resolver, &region, &products, options).await?;
        }
        Commands::Check {
            product,
            location,
            products,
            no_live_fetch,
        } => {
            let options = resolve::filter_options(no_live_fetch, false);
            resolve::run_check(&resolver, &product, &location, products.as_deref(), options)
                .await?;
        }
        Commands::Preload { codes } => resolve::run_preload(&resolver, &codes).await?,
        Commands::Stats => cache::run_stats(&resolver).await?,
        Commands::RebuildIndex => cache::run_rebuild_index(&resolver).await?,
        Commands::Cleanup {
            max_age_hours,
            min_access,
        } => cache::run_cleanup(&resolver, max_age_hours, min_access).await?,
        Commands::Import { file } => cache::run_import(&resolver, &file).await?,
        Commands::Regions => cache::run_regions(&resolver)?,
    }

    Ok(())
}

/// Wires store, upstream client and region table from config.
///
/// Without `REZDY_API_KEY` the resolver runs on stored data and product
/// descriptions only.
fn build_resolver(config: &AppConfig) -> anyhow::Result<PickupResolver> {
    let table = match &config.regions_path {
        Some(path) => pickup_core::load_regions(path)?,
        None => RegionTable::default(),
    };
    let store = PickupStore::new(&config.store_dir, StoreOptions::from_app_config(config));

    let fetcher = RezdyClient::from_app_config(config)?
        .map(|client| Arc::new(client) as Arc<dyn PickupFetcher>);
    if fetcher.is_none() {
        tracing::warn!("REZDY_API_KEY is not set; live fetch and preload are disabled");
    }

    Ok(PickupResolver::new(
        store,
        LocationNormalizer::new(table),
        fetcher,
        ResolverOptions::from_app_config(config),
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
