use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chain_collector::config::{CoinsFile, Config};
use chain_collector::database::LedgerStore;
use chain_collector::exchange_rate::ExchangeRateFetcher;
use chain_collector::stats::{Dispatcher, Packer, PresetRegistry, StatEngine};
use chain_collector::sync::ChainSync;
use chain_collector::tasks;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chain_collector=debug"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();

    let config = Config::parse();
    tracing::info!("Starting chain-collector...");

    let coins: Vec<_> = CoinsFile::load(&config.coins_file)?
        .coins
        .into_iter()
        .map(Arc::new)
        .collect();
    tracing::info!(
        "Loaded {} coins: {}",
        coins.len(),
        coins.iter().map(|c| c.symbol.as_str()).collect::<Vec<_>>().join(", ")
    );

    // ========== Store ==========

    let workers = config.worker_count();
    let store = LedgerStore::connect(&config.database_path, (workers + coins.len()) as u32).await?;
    tracing::info!("Opened database at {}", config.database_path.display());

    // ========== Chain Sync ==========

    let with_prices = !config.btcavg_pubkey.is_empty();
    let syncers: Vec<Arc<ChainSync>> = coins
        .iter()
        .map(|coin| {
            let sync = ChainSync::new(coin.clone(), store.clone());
            let sync = if with_prices {
                sync.with_prices(Arc::new(ExchangeRateFetcher::new(
                    &coin.symbol,
                    &config.btcavg_pubkey,
                    &config.btcavg_secret,
                    store.clone(),
                )))
            } else {
                sync
            };
            Arc::new(sync)
        })
        .collect();

    // ========== Statistics ==========

    let presets = if with_prices {
        PresetRegistry::standard().with_prices()
    } else {
        PresetRegistry::standard()
    };
    tracing::info!("Loaded {} statistic presets", presets.len());

    let dispatcher = Arc::new(Dispatcher::start(workers, Arc::new(StatEngine::new(store.clone()))));
    let packer = Arc::new(Packer::new(store.clone(), Arc::new(presets), dispatcher, &config.output_dir));

    // ========== Initial Sync ==========

    tracing::info!("Running initial sync..");
    tasks::sync_all(&syncers).await;

    // ========== Background Tasks ==========

    let package = Arc::new(Notify::new());
    let packaging_handle = tasks::spawn_packaging(packer, coins.clone(), package.clone());
    package.notify_one();

    let sync_handle = tasks::spawn_sync_loop(syncers, config.sync_interval(), package);
    tracing::info!("Sync loop started, every {:?}", config.sync_interval());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    sync_handle.abort();
    packaging_handle.abort();

    Ok(())
}
