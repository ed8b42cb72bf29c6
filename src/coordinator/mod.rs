//! Coordinator
//!
//! Composes the registries, detector and peg controller, and owns the
//! process-level lifecycle:
//! - state load at startup and flush at shutdown
//! - token-universe application (initial and on reload)
//! - background tasks: detector loop, RPC accounting, liquidity sweep,
//!   reconciliation refresh
//!
//! Every collaborator is passed in; there is no global state.
//!
//! Created: 2026-02-06

pub mod sweep;
pub mod tasks;

pub use sweep::{sweep_low_liquidity, LiquidityFloor};

use crate::arbitrage::{ArbitrageDetector, OpportunitySink};
use crate::chain::{ChainClient, RpcMeter};
use crate::config::MonitorConfig;
use crate::error::RegistryError;
use crate::peg::{PegController, PoolPriceHistory, PriceFeed, SystemGate};
use crate::persistence::StateStore;
use crate::pool::{PoolRegistry, PriceChange};
use crate::throttle::RequestThrottleCache;
use crate::token::TokenRegistry;
use crate::universe::{self, EntryError, UniverseEntry};
use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the swap → detector channel
const PRICE_CHANGE_BUFFER: usize = 1024;

/// Outcome of applying a token-universe descriptor
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UniverseReport {
    pub rejected: usize,
    pub disabled: usize,
    pub enabled: usize,
    pub added: usize,
    pub pools_added: usize,
}

pub struct Coordinator {
    config: MonitorConfig,
    chain: Arc<dyn ChainClient>,
    meter: Arc<RpcMeter>,
    store: Arc<dyn StateStore>,
    tokens: TokenRegistry,
    pools: PoolRegistry,
    throttle: RequestThrottleCache,
    gate: SystemGate,
    detector: Arc<ArbitrageDetector>,
    peg: Option<Arc<PegController>>,
    price_changes: Mutex<Option<mpsc::Receiver<PriceChange>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Wire everything together. `chain` should already be metered by `meter`.
    /// The peg controller is built only when USD tracking is enabled and a
    /// feed is supplied.
    pub fn new(
        config: MonitorConfig,
        chain: Arc<dyn ChainClient>,
        meter: Arc<RpcMeter>,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn OpportunitySink>,
        feed: Option<Arc<dyn PriceFeed>>,
    ) -> Self {
        let concurrency = config.rpc_concurrency;
        let throttle = RequestThrottleCache::new(config.pool_retry_window());
        let tokens = TokenRegistry::new(chain.clone(), config.reference_stable, concurrency);
        let (tx, rx) = mpsc::channel(PRICE_CHANGE_BUFFER);
        let pools = PoolRegistry::new(chain.clone(), tokens.clone(), throttle.clone(), concurrency).with_price_changes(tx);

        let gate = SystemGate::new();
        let detector = Arc::new(ArbitrageDetector::new(
            pools.clone(),
            config.detector_config(),
            gate.clone(),
            sink,
        ));

        let peg = match feed {
            Some(feed) if config.enable_usd_tracking => {
                let history = Arc::new(PoolPriceHistory::new(pools.clone()));
                Some(Arc::new(PegController::new(config.peg_config(), feed, history, gate.clone())))
            }
            _ => None,
        };

        Self {
            config,
            chain,
            meter,
            store,
            tokens,
            pools,
            throttle,
            gate,
            detector,
            peg,
            price_changes: Mutex::new(Some(rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    pub fn gate(&self) -> &SystemGate {
        &self.gate
    }

    pub fn meter(&self) -> &Arc<RpcMeter> {
        &self.meter
    }

    pub fn peg(&self) -> Option<&Arc<PegController>> {
        self.peg.as_ref()
    }

    pub fn floor(&self) -> LiquidityFloor {
        LiquidityFloor {
            min_usd: self.config.min_pool_liquidity_usd,
            one_sided_factor: self.config.one_sided_liquidity_factor,
        }
    }

    /// Confirm the node delivers new blocks within `timeout`.
    pub async fn check_block_feed(&self, timeout: Duration) -> Result<u64> {
        let current = self.chain.block_number().await.context("Failed to read block number")?;
        info!("Connected at block {}", current);

        let mut blocks = self.chain.subscribe_blocks().await.context("Failed to subscribe to new blocks")?;
        match tokio::time::timeout(timeout, blocks.next()).await {
            Ok(Some(number)) => {
                info!("✅ Block feed live (block {})", number);
                Ok(number)
            }
            Ok(None) => bail!("Block subscription closed before the first block"),
            Err(_) => bail!("No new block within {:?}", timeout),
        }
    }

    /// Seed registries and the throttle cache from the store.
    pub fn load_state(&self) -> Result<()> {
        let tokens = self.tokens.load(self.store.load_tokens()?);
        let pools = self.pools.load(self.store.load_pools()?);
        let records = self.store.load_throttle()?;
        let throttle = records.len();
        self.throttle.load(records);
        info!(
            "💾 State loaded: {} tokens, {} pools, {} lookup records",
            tokens, pools, throttle
        );
        Ok(())
    }

    /// Write registries and throttle records to the store. Every part is
    /// attempted; the first failure is returned.
    pub fn flush(&self) -> Result<()> {
        let pruned = self.throttle.prune(Utc::now());
        if pruned > 0 {
            debug!("Pruned {} expired lookup records", pruned);
        }

        let results = [
            self.store.save_tokens(&self.tokens.all()).context("Failed to save tokens"),
            self.store.save_pools(&self.pools.all()).context("Failed to save pools"),
            self.store
                .save_throttle(&self.throttle.records())
                .context("Failed to save lookup records"),
        ];
        let mut first_err = None;
        for result in results {
            if let Err(e) = result {
                error!("{:#}", e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                info!("💾 State saved");
                Ok(())
            }
        }
    }

    /// Read the descriptor file and apply it.
    pub async fn reload_universe(&self, first_run: bool) -> Result<UniverseReport> {
        let (entries, errors) = universe::load_descriptor(&self.config.universe_file, self.config.reference_stable)?;
        Ok(self.apply_universe(entries, &errors, first_run).await)
    }

    /// Bring the registries in line with a descriptor.
    pub async fn apply_universe(&self, entries: Vec<UniverseEntry>, errors: &[EntryError], first_run: bool) -> UniverseReport {
        let mut report = UniverseReport {
            rejected: errors.len(),
            ..Default::default()
        };
        for e in errors {
            error!("❌ Rejected universe entry {}", e);
        }

        let diff = universe::diff(&entries, &self.tokens);

        for address in &diff.to_disable {
            match self.tokens.disable(*address, &self.pools).await {
                Ok(true) => report.disabled += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to disable token {:?}: {}", address, e),
            }
        }

        if first_run {
            let refreshed = self.tokens.refresh_all().await;
            info!("Refreshed {} known tokens", refreshed);
        }
        self.tokens.watch_all().await;

        for address in &diff.to_enable {
            match self.tokens.enable(*address, &self.pools).await {
                Ok(true) => report.enabled += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to enable token {:?}: {}", address, e),
            }
        }

        let added: Vec<Result<_, RegistryError>> = stream::iter(diff.to_add)
            .map(|entry| async move { self.tokens.add(entry.address, entry.category).await })
            .buffer_unordered(self.config.rpc_concurrency.max(1))
            .collect()
            .await;
        for result in added {
            match result {
                Ok(_) => report.added += 1,
                Err(e) => warn!("Failed to add token: {}", e),
            }
        }
        self.tokens.watch_all().await;

        report.pools_added = self.discover_pools().await;

        if first_run {
            let refreshed = self.pools.refresh_all().await;
            info!("Refreshed {} known pools", refreshed);
        }
        self.pools.watch_all().await;

        if let Err(e) = self.flush() {
            warn!("Flush after universe update failed: {:#}", e);
        }

        info!(
            "🌐 Universe applied: +{} tokens, {} re-enabled, {} disabled, {} rejected, +{} pools ({} tokens / {} pools active)",
            report.added,
            report.enabled,
            report.disabled,
            report.rejected,
            report.pools_added,
            self.tokens.active().len(),
            self.pools.active().len()
        );
        report
    }

    /// Look up pools for every pair of active tokens.
    async fn discover_pools(&self) -> usize {
        let mut active: Vec<Address> = self.tokens.active().into_iter().map(|t| t.address).collect();
        active.sort();

        let mut pairs = Vec::new();
        for (i, a) in active.iter().enumerate() {
            for b in &active[i + 1..] {
                pairs.push((*a, *b));
            }
        }

        let results: Vec<Result<Vec<Address>, RegistryError>> = stream::iter(pairs)
            .map(|(a, b)| async move { self.pools.add(a, b).await })
            .buffer_unordered(self.config.rpc_concurrency.max(1))
            .collect()
            .await;

        let mut added = 0;
        for result in results {
            match result {
                Ok(pools) => added += pools.len(),
                Err(e @ (RegistryError::PoolExists(_) | RegistryError::Throttled(_))) => debug!("{}", e),
                Err(e) => warn!("Pool discovery failed: {}", e),
            }
        }
        added
    }

    pub async fn sweep_low_liquidity(&self) -> usize {
        sweep_low_liquidity(&self.pools, &self.gate, self.floor()).await
    }

    /// Start the detector loop, peg tracking and maintenance tasks.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(rx) = self.price_changes.lock().unwrap_or_else(|e| e.into_inner()).take() {
            tasks.push(tokio::spawn(self.detector.clone().run(rx)));
        }

        tasks.push(tasks::spawn_meter_reset(self.meter.clone()));
        tasks.push(tasks::spawn_meter_log(
            self.meter.clone(),
            Duration::from_secs(self.config.rpc_log_interval_secs.max(1)),
        ));
        if self.config.liquidity_sweep_secs > 0 {
            tasks.push(tasks::spawn_liquidity_sweep(
                self.pools.clone(),
                self.gate.clone(),
                self.floor(),
                Duration::from_secs(self.config.liquidity_sweep_secs),
            ));
        }
        if self.config.refresh_interval_secs > 0 {
            tasks.push(tasks::spawn_reconciliation(
                self.tokens.clone(),
                self.pools.clone(),
                Duration::from_secs(self.config.refresh_interval_secs),
            ));
        }

        if let Some(peg) = &self.peg {
            peg.register_pairs();
            peg.start();
        }
        info!("🚀 Monitor running ({} background tasks)", tasks.len());
    }

    /// Orderly shutdown. Each step runs even if an earlier one failed.
    pub fn shutdown(&self) {
        info!("Shutting down...");
        let tokens = self.tokens.stop_watching_all();
        info!("Token subscriptions stopped ({})", tokens);
        let pools = self.pools.stop_watching_all();
        info!("Pool subscriptions stopped ({})", pools);

        if let Err(e) = self.flush() {
            error!("Final flush failed: {:#}", e);
        }

        if let Some(peg) = &self.peg {
            peg.stop();
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        self.meter.log_throughput(Utc::now());
        info!("Shutdown complete");
    }
}
