//! DEX Arbitrage Monitor
//!
//! Main entry point. Connects to a WebSocket RPC node, loads persisted
//! state and the token universe, then runs until SIGINT/SIGTERM:
//! - swap events drive cycle detection and opportunity alerts
//! - the token universe is re-applied on SIGHUP or when its file changes
//! - state is flushed on shutdown
//!
//! Created: 2026-02-06

use alloy::providers::{ProviderBuilder, WsConnect};
use anyhow::{Context, Result};
use clap::Parser;
use dexarb_monitor::arbitrage::JsonOpportunityRecorder;
use dexarb_monitor::chain::{AlloyChainClient, ChainClient, MeteredChain, RpcMeter};
use dexarb_monitor::config::load_config;
use dexarb_monitor::coordinator::Coordinator;
use dexarb_monitor::peg::{CoinbaseTickerFeed, PriceFeed};
use dexarb_monitor::persistence::JsonStateStore;
use futures::StreamExt;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// DEX Arbitrage Monitor: Uniswap V3 cycle detection + stablecoin peg oracle
#[derive(Parser)]
#[command(name = "dexarb-monitor")]
struct Args {
    /// Environment file with RPC and monitor settings
    #[arg(short, long, default_value = ".env")]
    env_file: PathBuf,

    /// Token universe descriptor (overrides UNIVERSE_FILE)
    #[arg(short, long)]
    universe: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args.env_file)?;
    init_logging(args.log_json);

    if let Some(universe) = args.universe {
        config.universe_file = universe;
    }

    info!("===========================================");
    info!("   DEX Arbitrage Monitor");
    info!("===========================================");
    info!("Factory: {:?}", config.factory);
    info!("Reference stable: {:?}", config.reference_stable);
    info!("Universe: {}", config.universe_file.display());
    info!("Min profit: ${:.2}, max cycle length {}", config.min_profit_usd, config.max_cycle_len);

    // WebSocket provider serves both reads and subscriptions
    let ws = WsConnect::new(config.rpc_ws_url.clone());
    let provider = ProviderBuilder::new()
        .connect_ws(ws)
        .await
        .context("Failed to connect to RPC WebSocket")?;
    info!("✅ Connected to RPC WebSocket");

    let meter = Arc::new(RpcMeter::new());
    let client = Arc::new(AlloyChainClient::new(Arc::new(provider), config.factory));
    let chain: Arc<dyn ChainClient> = Arc::new(MeteredChain::new(client, meter.clone()));

    let store = Arc::new(JsonStateStore::new(&config.state_dir)?);
    let sink = Arc::new(JsonOpportunityRecorder::new(&config.opportunity_dir)?);
    let feed: Option<Arc<dyn PriceFeed>> = if config.enable_usd_tracking {
        Some(Arc::new(CoinbaseTickerFeed::new(config.price_feed_url.clone())))
    } else {
        info!("USD tracking disabled");
        None
    };

    let coordinator = Coordinator::new(config.clone(), chain, meter, store, sink, feed);

    coordinator
        .check_block_feed(Duration::from_secs(config.startup_block_timeout_secs))
        .await
        .context("Startup connectivity check failed")?;
    coordinator.load_state()?;

    // No baseline exists yet, so a broken descriptor is fatal here
    coordinator
        .reload_universe(true)
        .await
        .context("Initial token universe load failed")?;
    coordinator.sweep_low_liquidity().await;
    coordinator.start();

    let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();

    let mut last_modified = modified_at(&config.universe_file);
    let mut poll = tokio::time::interval(Duration::from_secs(config.universe_poll_secs.max(1)));
    poll.tick().await;

    loop {
        let reload = tokio::select! {
            sig = signals.next() => match sig {
                Some(SIGHUP) => {
                    info!("Received SIGHUP - reloading token universe");
                    last_modified = modified_at(&config.universe_file);
                    true
                }
                Some(sig) => {
                    info!("Received signal {} - stopping", sig);
                    break;
                }
                None => break,
            },
            _ = poll.tick() => {
                let modified = modified_at(&config.universe_file);
                if modified.is_some() && modified != last_modified {
                    info!("Token universe file changed - reloading");
                    last_modified = modified;
                    true
                } else {
                    false
                }
            }
        };

        if reload {
            // Keep the last good universe on a broken descriptor
            match coordinator.reload_universe(false).await {
                Ok(report) => info!("Universe reload: {:?}", report),
                Err(e) => warn!("Token universe reload skipped: {:#}", e),
            }
        }
    }

    signals_handle.close();
    coordinator.shutdown();

    // last reference to the provider: closes the WebSocket
    drop(coordinator);
    info!("RPC WebSocket closed");
    Ok(())
}
