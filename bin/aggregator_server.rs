//! Entry point: loads configuration, wires the freshness engine together
//! per configured chain, starts the scheduler loop and the HTTP server, and
//! drains in-flight discovery jobs within the configured grace window on
//! shutdown.

use dex_price_aggregator::chain_adapter::{ChainAdapter, EvmChainAdapter};
use dex_price_aggregator::discovery::DiscoveryManager;
use dex_price_aggregator::pool_controller::{PoolController, TierIntervals};
use dex_price_aggregator::scheduler::{ChainHandle, Scheduler};
use dex_price_aggregator::snapshot::{ChainContext, SnapshotService};
use dex_price_aggregator::state_cache::StateCache;
use dex_price_aggregator::storage::Storage;
use dex_price_aggregator::token_list::{self, TokenList};
use dex_price_aggregator::types::Chain;
use dex_price_aggregator::{http, Settings};
use clap::Parser;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(about = "Multi-chain DEX spot price and liquidity freshness engine")]
struct Cli {
    /// Path to the TOML config file (RPC URLs are still read from
    /// RPC_URL_ETHEREUM / RPC_URL_POLYGON regardless of this setting).
    #[arg(short, long, default_value = "Config.toml")]
    config: String,

    /// Overrides `bind_addr` from the config file.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut settings = Settings::load_from(&cli.config)?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }
    info!(chains = settings.chains.len(), "loaded configuration");

    let storage = Arc::new(Storage::new(settings.storage_path.clone()));
    let cache = Arc::new(StateCache::new());
    let controller = Arc::new(PoolController::new(TierIntervals {
        high: Duration::from_secs(settings.tier_intervals.high_secs),
        normal: Duration::from_secs(settings.tier_intervals.normal_secs),
        low: Duration::from_secs(settings.tier_intervals.low_secs),
    }));
    let discovery = Arc::new(DiscoveryManager::new(Duration::from_secs(settings.discovery_retry_window_secs)));

    let mut snapshot_chains = HashMap::new();
    let mut scheduler_chains = Vec::new();

    for (name, config) in &settings.chains {
        let Ok(chain) = Chain::from_str(name) else {
            warn!(chain = %name, "skipping unrecognized chain in configuration");
            continue;
        };

        let adapter: Arc<dyn ChainAdapter> = Arc::new(EvmChainAdapter::new(
            chain.name(),
            chain.chain_id(),
            config,
            Duration::from_secs(settings.multicall_timeout_secs),
        )?);

        // Rebuild the alive set from whatever was persisted last run so the
        // scheduler has work to do before the first discovery cycle.
        let registry = storage.get_pool_registry(chain).await;
        for pool in registry.pools.values() {
            controller.track(pool.address, chain.chain_id());
        }

        let tokens = token_list::load_merged(
            chain.chain_id(),
            &config.static_tokens,
            config.token_list_url.as_deref(),
            Duration::from_secs(settings.token_list_timeout_secs),
        )
        .await;
        info!(%chain, tokens = tokens.len(), "loaded token catalog");

        snapshot_chains.insert(
            chain,
            ChainContext {
                adapter: adapter.clone(),
                token_list: Arc::new(TokenList::new(tokens)),
                base_tokens: config.base_token_addresses()?,
                fee_tiers: settings.fee_tiers.clone(),
                stable_reference: config.stable_reference_address()?,
            },
        );
        scheduler_chains.push(ChainHandle::new(chain, adapter));
    }

    let snapshot_service = Arc::new(SnapshotService::new(
        snapshot_chains,
        storage.clone(),
        cache.clone(),
        controller.clone(),
        discovery.clone(),
        Duration::from_secs(settings.cache_ttl_secs),
    ));

    let scheduler = Arc::new(Scheduler::new(
        scheduler_chains,
        controller.clone(),
        cache.clone(),
        storage.clone(),
        settings.max_batch_weight,
    ));

    let scheduler_handle = tokio::spawn({
        let scheduler = scheduler.clone();
        let period = Duration::from_secs(settings.scheduler_period_secs);
        async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                scheduler.tick().await;
            }
        }
    });

    let app = http::router(snapshot_service.clone());
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!(addr = %settings.bind_addr, "snapshot server listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("shutting down: draining in-flight discovery jobs");
    scheduler_handle.abort();
    snapshot_service.shutdown(Duration::from_secs(settings.shutdown_grace_secs)).await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(feature = "observability")]
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    fmt().with_env_filter(EnvFilter::from_default_env()).json().init();
}

// With no subscriber installed, `tracing` events are simply dropped rather
// than panicking, so the non-observability build still runs fine -- it just
// has nowhere to send the log output without the feature enabled.
#[cfg(not(feature = "observability"))]
fn init_tracing() {}
