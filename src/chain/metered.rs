//! RPC accounting
//!
//! [`RpcMeter`] counts requests and delivered events since the last daily
//! reset. [`MeteredChain`] wraps any [`ChainClient`] and reports to it.
//!
//! Created: 2026-02-04

use super::{ChainClient, EventStream, SwapEvent, TokenMetadata, TransferEvent, TransferLeg};
use crate::types::Slot0;
use alloy::primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Request counter with a reset point
#[derive(Debug)]
pub struct RpcMeter {
    calls: AtomicU64,
    since: Mutex<DateTime<Utc>>,
}

impl RpcMeter {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            since: Mutex::new(Utc::now()),
        }
    }

    pub fn record(&self, calls: u64) {
        self.calls.fetch_add(calls, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn since(&self) -> DateTime<Utc> {
        self.since.lock().map(|s| *s).unwrap_or_else(|e| *e.into_inner())
    }

    /// Zero the counter, returning the previous total.
    pub fn reset(&self, now: DateTime<Utc>) -> u64 {
        let previous = self.calls.swap(0, Ordering::Relaxed);
        match self.since.lock() {
            Ok(mut since) => *since = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
        previous
    }

    /// Average calls per second since the last reset.
    pub fn throughput(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.since()).num_milliseconds().max(1) as f64 / 1000.0;
        self.count() as f64 / elapsed
    }

    pub fn log_throughput(&self, now: DateTime<Utc>) {
        info!(
            "📈 RPC usage: {} calls since {} ({:.2}/s)",
            self.count(),
            self.since().format("%Y-%m-%d %H:%M UTC"),
            self.throughput(now)
        );
    }
}

impl Default for RpcMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ChainClient`] decorator reporting every call and event to a meter.
pub struct MeteredChain {
    inner: Arc<dyn ChainClient>,
    meter: Arc<RpcMeter>,
}

impl MeteredChain {
    pub fn new(inner: Arc<dyn ChainClient>, meter: Arc<RpcMeter>) -> Self {
        Self { inner, meter }
    }

    fn metered<T: Send + 'static>(&self, stream: EventStream<T>) -> EventStream<T> {
        let meter = self.meter.clone();
        Box::pin(stream.inspect(move |_| meter.record(1)))
    }
}

#[async_trait]
impl ChainClient for MeteredChain {
    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        self.meter.record(4);
        self.inner.token_metadata(token).await
    }

    async fn total_supply(&self, token: Address) -> Result<U256> {
        self.meter.record(1);
        self.inner.total_supply(token).await
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        self.meter.record(1);
        self.inner.balance_of(token, owner).await
    }

    async fn pool_snapshot(&self, pool: Address) -> Result<(Slot0, u128)> {
        self.meter.record(2);
        self.inner.pool_snapshot(pool).await
    }

    async fn tick_spacing(&self, pool: Address) -> Result<i32> {
        self.meter.record(1);
        self.inner.tick_spacing(pool).await
    }

    async fn get_pool(&self, token0: Address, token1: Address, fee: u32) -> Result<Address> {
        self.meter.record(1);
        self.inner.get_pool(token0, token1, fee).await
    }

    async fn block_number(&self) -> Result<u64> {
        self.meter.record(1);
        self.inner.block_number().await
    }

    async fn subscribe_transfers(&self, token: Address, leg: TransferLeg) -> Result<EventStream<TransferEvent>> {
        self.meter.record(1);
        let stream = self.inner.subscribe_transfers(token, leg).await?;
        Ok(self.metered(stream))
    }

    async fn subscribe_swaps(&self, pool: Address) -> Result<EventStream<SwapEvent>> {
        self.meter.record(1);
        let stream = self.inner.subscribe_swaps(pool).await?;
        Ok(self.metered(stream))
    }

    async fn subscribe_blocks(&self) -> Result<EventStream<u64>> {
        self.meter.record(1);
        let stream = self.inner.subscribe_blocks().await?;
        Ok(self.metered(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;

    #[tokio::test]
    async fn test_metered_chain_counts_calls() {
        let mock = Arc::new(MockChain::new());
        let token = Address::repeat_byte(1);
        mock.add_token(token, "AAA", 18, U256::from(1000u64));

        let meter = Arc::new(RpcMeter::new());
        let chain = MeteredChain::new(mock, meter.clone());

        chain.token_metadata(token).await.unwrap();
        chain.total_supply(token).await.unwrap();
        assert_eq!(meter.count(), 5);

        let previous = meter.reset(Utc::now());
        assert_eq!(previous, 5);
        assert_eq!(meter.count(), 0);
    }

    #[tokio::test]
    async fn test_metered_chain_counts_events() {
        let mock = Arc::new(MockChain::new());
        let pool = Address::repeat_byte(7);
        let meter = Arc::new(RpcMeter::new());
        let chain = MeteredChain::new(mock.clone(), meter.clone());

        let mut swaps = chain.subscribe_swaps(pool).await.unwrap();
        mock.push_swap(pool, U256::from(1u64) << 96, 0, 10);
        assert!(swaps.next().await.is_some());
        assert_eq!(meter.count(), 2);
    }
}
