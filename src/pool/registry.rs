//! Pool Registry
//!
//! Thread-safe V3 pool cache keyed by pool address, plus discovery of new
//! pools through the factory.
//!
//! Sync model:
//! - `refresh`: (slot0 + liquidity) and (reserve0 + reserve1) read
//!   concurrently via `tokio::join!`, applied under the pool's entry lock
//! - `watch_events`: one task per pool consumes its Swap stream, updates
//!   price/liquidity straight from the event and publishes a
//!   [`PriceChange`] for the detector
//!
//! Swaps and refreshes race on the same entry. Each applied swap bumps a
//! per-pool counter; a refresh whose snapshot was read before a swap landed
//! drops that snapshot, so a refresh never rolls a pool back to an older
//! price.
//!
//! A pool only reaches the map after its initial refresh succeeded, and
//! `watch_events` refreshes first if a loaded pool has never been read, so
//! swap handling never precedes the first snapshot.
//!
//! Created: 2026-02-03
//! Modified: 2026-02-05 - Throttled discovery, price-change channel
//! Modified: 2026-02-07 - Refresh yields to swaps applied mid-fetch

use crate::chain::alloy_client::DISCOVERY_FEE_TIERS;
use crate::chain::{ChainClient, SwapEvent, WatchHandle};
use crate::error::RegistryError;
use crate::throttle::{RequestThrottleCache, RpcMethod};
use crate::token::{MarketView, TokenRegistry};
use crate::types::{pool_key, sort_tokens, Pool, Slot0};
use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Emitted after a swap moved a pool's cached price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceChange {
    pub pool: Address,
    pub at: DateTime<Utc>,
}

/// Result of the two concurrent refresh batches; `None` where a batch failed.
#[derive(Debug, Clone, Default)]
pub struct PoolFetch {
    pub snapshot: Option<(Slot0, u128)>,
    pub reserves: Option<(U256, U256)>,
}

impl PoolFetch {
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.reserves.is_none()
    }

    /// Apply whatever was read. Returns true if anything was applied.
    pub fn apply(&self, pool: &mut Pool, now: DateTime<Utc>) -> bool {
        if let Some((slot0, liquidity)) = self.snapshot {
            pool.apply_snapshot(slot0, liquidity, now);
        }
        if let Some((r0, r1)) = self.reserves {
            pool.apply_reserves(r0, r1, now);
        }
        if self.is_empty() {
            return false;
        }
        pool.last_fetch = Some(now);
        true
    }
}

/// Shared pool registry handle
#[derive(Clone)]
pub struct PoolRegistry {
    pools: Arc<DashMap<Address, Pool>>,
    watchers: Arc<DashMap<Address, WatchHandle>>,
    /// Swaps applied per pool, bumped under the pool's entry lock
    swap_counts: Arc<DashMap<Address, u64>>,
    tokens: TokenRegistry,
    throttle: RequestThrottleCache,
    chain: Arc<dyn ChainClient>,
    price_changes: Option<mpsc::Sender<PriceChange>>,
    concurrency: usize,
}

impl PoolRegistry {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        tokens: TokenRegistry,
        throttle: RequestThrottleCache,
        concurrency: usize,
    ) -> Self {
        Self {
            pools: Arc::new(DashMap::new()),
            watchers: Arc::new(DashMap::new()),
            swap_counts: Arc::new(DashMap::new()),
            tokens,
            throttle,
            chain,
            price_changes: None,
            concurrency: concurrency.max(1),
        }
    }

    /// Publish swap-driven price changes on `tx`.
    pub fn with_price_changes(mut self, tx: mpsc::Sender<PriceChange>) -> Self {
        self.price_changes = Some(tx);
        self
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn throttle(&self) -> &RequestThrottleCache {
        &self.throttle
    }

    pub fn get(&self, address: Address) -> Option<Pool> {
        self.pools.get(&address).map(|p| p.clone())
    }

    pub fn all(&self) -> Vec<Pool> {
        self.pools.iter().map(|p| p.value().clone()).collect()
    }

    pub fn active(&self) -> Vec<Pool> {
        self.pools
            .iter()
            .filter(|p| p.is_active())
            .map(|p| p.value().clone())
            .collect()
    }

    pub fn for_token(&self, token: Address) -> Vec<Pool> {
        self.pools
            .iter()
            .filter(|p| p.involves(token))
            .map(|p| p.value().clone())
            .collect()
    }

    pub fn for_pair(&self, token_a: Address, token_b: Address) -> Vec<Pool> {
        let (t0, t1) = sort_tokens(token_a, token_b);
        self.pools
            .iter()
            .filter(|p| p.token0() == t0 && p.token1() == t1)
            .map(|p| p.value().clone())
            .collect()
    }

    pub fn created_before(&self, t: DateTime<Utc>) -> Vec<Pool> {
        self.pools
            .iter()
            .filter(|p| p.created_at < t)
            .map(|p| p.value().clone())
            .collect()
    }

    pub fn exists(&self, token0: Address, token1: Address, fee: u32) -> bool {
        self.pools
            .iter()
            .any(|p| p.token0() == token0 && p.token1() == token1 && p.fee == fee)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Seed from persisted state. Existing entries are left untouched.
    pub fn load(&self, pools: Vec<Pool>) -> usize {
        let mut loaded = 0;
        for pool in pools {
            if let Entry::Vacant(slot) = self.pools.entry(pool.address) {
                slot.insert(pool);
                loaded += 1;
            }
        }
        loaded
    }

    /// Consistent snapshot of both registries.
    pub fn market_view(&self) -> MarketView {
        MarketView::new(self.tokens.all(), self.all(), self.tokens.reference_stable())
    }

    pub fn pool_key(&self, pool: &Pool) -> String {
        let symbol = |a: Address| {
            self.tokens
                .get(a)
                .map(|t| t.symbol)
                .unwrap_or_else(|| format!("{:?}", a))
        };
        pool_key(&symbol(pool.token0()), &symbol(pool.token1()), pool.fee)
    }

    fn throttle_key(token0: Address, token1: Address, fee: u32) -> String {
        format!("{:?}-{:?}-{}", token0, token1, fee)
    }

    /// Discover and admit pools for a token pair across the discovery fee
    /// tiers. Returns the addresses of admitted pools (possibly none).
    pub async fn add(&self, token_a: Address, token_b: Address) -> Result<Vec<Address>, RegistryError> {
        let a = self.tokens.get(token_a).ok_or(RegistryError::UnknownToken(token_a))?;
        let b = self.tokens.get(token_b).ok_or(RegistryError::UnknownToken(token_b))?;
        if !a.is_active() {
            return Err(RegistryError::TokenDisabled(token_a));
        }
        if !b.is_active() {
            return Err(RegistryError::TokenDisabled(token_b));
        }
        if token_a == token_b {
            return Err(RegistryError::IdenticalTokens(token_a));
        }

        let (t0, t1) = sort_tokens(token_a, token_b);
        let (sym0, sym1) = if t0 == a.address {
            (a.symbol, b.symbol)
        } else {
            (b.symbol, a.symbol)
        };
        let pair = format!("{}-{}", sym0, sym1);

        let missing: Vec<u32> = DISCOVERY_FEE_TIERS
            .iter()
            .copied()
            .filter(|fee| !self.exists(t0, t1, *fee))
            .collect();
        if missing.is_empty() {
            return Err(RegistryError::PoolExists(pair));
        }

        let now = Utc::now();
        let to_query: Vec<u32> = missing
            .into_iter()
            .filter(|fee| !self.throttle.is_throttled(&Self::throttle_key(t0, t1, *fee), RpcMethod::GetPool, now))
            .collect();
        if to_query.is_empty() {
            return Err(RegistryError::Throttled(pair));
        }

        let lookups = join_all(to_query.iter().map(|fee| async move {
            (*fee, self.chain.get_pool(t0, t1, *fee).await)
        }))
        .await;

        let mut candidates = Vec::new();
        for (fee, result) in lookups {
            match result {
                Ok(address) => {
                    self.throttle.add(&Self::throttle_key(t0, t1, fee), RpcMethod::GetPool);
                    if address == Address::ZERO {
                        debug!("No pool for {}-{}", pair, fee);
                    } else {
                        candidates.push(Pool::new(address, t0, t1, fee, Utc::now()));
                    }
                }
                Err(e) => warn!("getPool failed for {}-{}: {:#}", pair, fee, e),
            }
        }

        let mut admitted = Vec::new();
        for mut pool in candidates {
            let key = pool_key(&sym0, &sym1, pool.fee);
            let fetch = self.fetch_state(&pool).await;
            if fetch.snapshot.is_none() || fetch.reserves.is_none() {
                warn!("Initial refresh failed for new pool {} {:?}, discarding", key, pool.address);
                continue;
            }
            fetch.apply(&mut pool, Utc::now());
            pool.tick_spacing = self.chain.tick_spacing(pool.address).await.ok();

            if let Entry::Vacant(slot) = self.pools.entry(pool.address) {
                info!("🆕 Pool added: {} {:?}", key, pool.address);
                admitted.push(pool.address);
                slot.insert(pool);
            }
        }
        Ok(admitted)
    }

    /// Read price snapshot and reserves concurrently.
    pub async fn fetch_state(&self, pool: &Pool) -> PoolFetch {
        let (snapshot, reserves) = tokio::join!(self.chain.pool_snapshot(pool.address), async {
            tokio::join!(
                self.chain.balance_of(pool.token0(), pool.address),
                self.chain.balance_of(pool.token1(), pool.address)
            )
        });

        let snapshot = match snapshot {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("Failed to read snapshot of pool {:?}: {:#}", pool.address, e);
                None
            }
        };
        let reserves = match reserves {
            (Ok(r0), Ok(r1)) => Some((r0, r1)),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to read reserves of pool {:?}: {:#}", pool.address, e);
                None
            }
        };
        PoolFetch { snapshot, reserves }
    }

    fn swap_count(&self, address: Address) -> u64 {
        self.swap_counts.get(&address).map(|n| *n).unwrap_or(0)
    }

    /// Re-read a pool. `Ok(false)` when nothing could be applied.
    pub async fn refresh(&self, address: Address) -> Result<bool, RegistryError> {
        let pool = self.get(address).ok_or(RegistryError::UnknownPool(address))?;
        if !pool.is_active() {
            return Err(RegistryError::PoolDisabled(address));
        }

        let swaps_before = self.swap_count(address);
        let mut fetch = self.fetch_state(&pool).await;
        if fetch.is_empty() {
            return Ok(false);
        }

        let Some(mut entry) = self.pools.get_mut(&address) else {
            return Ok(false);
        };
        if !entry.is_active() {
            return Ok(false);
        }
        if self.swap_count(address) != swaps_before {
            debug!("Swap landed during refresh of {:?}, keeping its price", address);
            fetch.snapshot = None;
        }
        Ok(fetch.apply(&mut entry, Utc::now()))
    }

    /// Refresh every active pool through the concurrency cap.
    pub async fn refresh_all(&self) -> usize {
        let addresses: Vec<Address> = self.active().iter().map(|p| p.address).collect();
        let results: Vec<bool> = stream::iter(addresses)
            .map(|addr| async move { matches!(self.refresh(addr).await, Ok(true)) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.into_iter().filter(|ok| *ok).count()
    }

    pub async fn disable(&self, address: Address) -> Result<bool, RegistryError> {
        {
            let mut pool = self.pools.get_mut(&address).ok_or(RegistryError::UnknownPool(address))?;
            if !pool.is_active() {
                return Ok(false);
            }
            pool.disabled_at = Some(Utc::now());
        }
        self.stop_watching_events(address);
        if let Some(pool) = self.get(address) {
            info!("⛔ Pool disabled: {} {:?}", self.pool_key(&pool), address);
        }
        Ok(true)
    }

    /// Re-enable a pool, refresh it and resubscribe.
    pub async fn enable(&self, address: Address) -> Result<bool, RegistryError> {
        {
            let mut pool = self.pools.get_mut(&address).ok_or(RegistryError::UnknownPool(address))?;
            if pool.is_active() {
                return Ok(false);
            }
            pool.disabled_at = None;
        }

        match self.refresh(address).await {
            Ok(true) => {}
            Ok(false) => warn!("Refresh failed for re-enabled pool {:?}", address),
            Err(e) => warn!("Refresh failed for re-enabled pool {:?}: {}", address, e),
        }
        if let Err(e) = self.watch_events(address).await {
            warn!("Failed to resubscribe pool {:?}: {}", address, e);
        }
        if let Some(pool) = self.get(address) {
            info!("✅ Pool enabled: {} {:?}", self.pool_key(&pool), address);
        }
        Ok(true)
    }

    /// Disable every active pool referencing `token`.
    pub async fn disable_for_token(&self, token: Address) -> usize {
        let mut count = 0;
        for pool in self.for_token(token) {
            if let Ok(true) = self.disable(pool.address).await {
                count += 1;
            }
        }
        count
    }

    /// Enable every disabled pool referencing `token`, regardless of the
    /// state of the pool's other token.
    pub async fn enable_for_token(&self, token: Address) -> usize {
        let mut count = 0;
        for pool in self.for_token(token) {
            if let Ok(true) = self.enable(pool.address).await {
                count += 1;
            }
        }
        count
    }

    pub fn is_watching(&self, address: Address) -> bool {
        self.watchers
            .get(&address)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Subscribe to swaps. Returns `Ok(false)` when already watching.
    pub async fn watch_events(&self, address: Address) -> Result<bool, RegistryError> {
        let pool = self.get(address).ok_or(RegistryError::UnknownPool(address))?;
        if !pool.is_active() {
            return Err(RegistryError::PoolDisabled(address));
        }
        if self.is_watching(address) {
            return Ok(false);
        }
        if pool.slot0.is_none() && !self.refresh(address).await? {
            return Err(RegistryError::fetch(
                format!("pool {:?}", address),
                "no initial snapshot",
            ));
        }

        let key = self.pool_key(&pool);
        let mut swaps = self
            .chain
            .subscribe_swaps(address)
            .await
            .map_err(|e| RegistryError::subscription(format!("{} swaps", key), e))?;

        let pools = self.pools.clone();
        let swap_counts = self.swap_counts.clone();
        let notify = self.price_changes.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = swaps.next().await {
                if let Some(change) = apply_swap(&pools, &swap_counts, address, &event) {
                    debug!("🔄 Swap on {} tick {}", task_key, event.tick);
                    if let Some(tx) = &notify {
                        if tx.send(change).await.is_err() {
                            debug!("Price change receiver closed");
                        }
                    }
                }
            }
            warn!("Swap stream ended for {} {:?}", task_key, address);
        });
        let handle = WatchHandle::new(task);

        match self.watchers.entry(address) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_finished() {
                    return Ok(false);
                }
                slot.insert(handle);
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }
        debug!("👀 Watching swaps of {} {:?}", key, address);
        Ok(true)
    }

    pub fn stop_watching_events(&self, address: Address) -> bool {
        match self.watchers.remove(&address) {
            Some((_, handle)) => {
                handle.cancel();
                debug!("Stopped watching pool {:?}", address);
                true
            }
            None => false,
        }
    }

    /// Watch every active pool through the concurrency cap.
    pub async fn watch_all(&self) -> usize {
        let addresses: Vec<Address> = self.active().iter().map(|p| p.address).collect();
        let results: Vec<Result<bool, RegistryError>> = stream::iter(addresses)
            .map(|addr| async move { self.watch_events(addr).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut started = 0;
        for result in results {
            match result {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => warn!("Pool watch failed: {}", e),
            }
        }
        started
    }

    pub fn stop_watching_all(&self) -> usize {
        let addresses: Vec<Address> = self.watchers.iter().map(|e| *e.key()).collect();
        addresses
            .into_iter()
            .filter(|a| self.stop_watching_events(*a))
            .count()
    }
}

/// Update a pool from a swap payload. Returns a change notice for active pools.
fn apply_swap(
    pools: &DashMap<Address, Pool>,
    swap_counts: &DashMap<Address, u64>,
    address: Address,
    event: &SwapEvent,
) -> Option<PriceChange> {
    let mut pool = pools.get_mut(&address)?;
    if !pool.is_active() {
        return None;
    }
    let now = Utc::now();
    pool.apply_swap(event.sqrt_price_x96, event.tick, event.liquidity, now);
    *swap_counts.entry(address).or_insert(0) += 1;
    Some(PriceChange { pool: address, at: now })
}
