//! Chain access port
//!
//! Every on-chain read and subscription the registries need goes through
//! [`ChainClient`]. The live implementation is [`AlloyChainClient`];
//! [`MeteredChain`] decorates any client with RPC accounting.
//!
//! Subscriptions are plain streams. The registries hand each stream to a
//! single owning task and keep its [`WatchHandle`]; aborting the task drops
//! the stream, which releases the underlying subscription.
//!
//! Created: 2026-02-03
//! Modified: 2026-02-05 - Tick spacing read for pool admission

pub mod alloy_client;
pub mod metered;
#[cfg(test)]
pub mod mock;

pub use alloy_client::AlloyChainClient;
pub use metered::{MeteredChain, RpcMeter};

use crate::types::Slot0;
use alloy::primitives::{Address, I256, U256};
use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio::task::JoinHandle;

/// Boxed event stream returned by subscriptions
pub type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// ERC20 metadata read in one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
}

/// Which zero-address leg of a Transfer to follow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferLeg {
    /// `from == 0x0`
    Mint,
    /// `to == 0x0`
    Burn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub leg: TransferLeg,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapEvent {
    pub amount0: I256,
    pub amount1: I256,
    pub sqrt_price_x96: U256,
    pub liquidity: u128,
    pub tick: i32,
}

/// Everything the monitor reads from the chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// name, symbol, decimals and totalSupply in one batched round
    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata>;

    async fn total_supply(&self, token: Address) -> Result<U256>;

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256>;

    /// slot0 and liquidity, fetched together
    async fn pool_snapshot(&self, pool: Address) -> Result<(Slot0, u128)>;

    async fn tick_spacing(&self, pool: Address) -> Result<i32>;

    /// Factory lookup; `Address::ZERO` when no pool exists
    async fn get_pool(&self, token0: Address, token1: Address, fee: u32) -> Result<Address>;

    async fn block_number(&self) -> Result<u64>;

    async fn subscribe_transfers(&self, token: Address, leg: TransferLeg) -> Result<EventStream<TransferEvent>>;

    async fn subscribe_swaps(&self, pool: Address) -> Result<EventStream<SwapEvent>>;

    /// New block numbers as they arrive
    async fn subscribe_blocks(&self) -> Result<EventStream<u64>>;
}

/// Owner of an entity's event-consuming task.
///
/// Cancelling or dropping the handle aborts the task and with it the
/// subscription streams it owns.
#[derive(Debug)]
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn cancel(self) {
        self.task.abort();
    }

    /// True once the owning task has stopped, e.g. because the stream ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
