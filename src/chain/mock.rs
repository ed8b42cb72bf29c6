//! In-memory chain used by unit tests
//!
//! Reads are served from maps; subscriptions are unbounded channels the
//! test pushes events into.

use super::{ChainClient, EventStream, SwapEvent, TokenMetadata, TransferEvent, TransferLeg};
use crate::types::Slot0;
use alloy::primitives::{Address, I256, U256};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Default)]
struct MockState {
    tokens: HashMap<Address, TokenMetadata>,
    balances: HashMap<(Address, Address), U256>,
    snapshots: HashMap<Address, (Slot0, u128)>,
    factory: HashMap<(Address, Address, u32), Address>,
    failing: HashSet<Address>,
    get_pool_calls: usize,
    transfer_subs: HashMap<(Address, TransferLeg), Vec<mpsc::UnboundedSender<TransferEvent>>>,
    swap_subs: HashMap<Address, Vec<mpsc::UnboundedSender<SwapEvent>>>,
    block_subs: Vec<mpsc::UnboundedSender<u64>>,
    block: u64,
}

#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

/// sqrtPriceX96 for a raw token1-per-token0 ratio
pub fn sqrt_price_x96(raw_ratio: f64) -> U256 {
    U256::from((raw_ratio.sqrt() * 2f64.powi(96)) as u128)
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn add_token(&self, token: Address, symbol: &str, decimals: u8, supply: U256) {
        self.state().tokens.insert(
            token,
            TokenMetadata {
                name: format!("{} Token", symbol),
                symbol: symbol.to_string(),
                decimals,
                total_supply: supply,
            },
        );
    }

    pub fn set_supply(&self, token: Address, supply: U256) {
        if let Some(meta) = self.state().tokens.get_mut(&token) {
            meta.total_supply = supply;
        }
    }

    pub fn set_balance(&self, token: Address, owner: Address, balance: U256) {
        self.state().balances.insert((token, owner), balance);
    }

    /// Register a pool with the factory and give it a price and reserves.
    pub fn add_pool(&self, pool: Address, token_a: Address, token_b: Address, fee: u32, sqrt_price: U256, reserves: (U256, U256)) {
        let (t0, t1) = crate::types::sort_tokens(token_a, token_b);
        let mut state = self.state();
        state.factory.insert((t0, t1, fee), pool);
        state.snapshots.insert(
            pool,
            (
                Slot0 {
                    sqrt_price_x96: sqrt_price,
                    unlocked: true,
                    ..Default::default()
                },
                1_000_000,
            ),
        );
        state.balances.insert((t0, pool), reserves.0);
        state.balances.insert((t1, pool), reserves.1);
    }

    pub fn set_price(&self, pool: Address, sqrt_price: U256) {
        if let Some((slot0, _)) = self.state().snapshots.get_mut(&pool) {
            slot0.sqrt_price_x96 = sqrt_price;
        }
    }

    /// Make every read touching `addr` fail.
    pub fn fail(&self, addr: Address) {
        self.state().failing.insert(addr);
    }

    pub fn heal(&self, addr: Address) {
        self.state().failing.remove(&addr);
    }

    pub fn get_pool_calls(&self) -> usize {
        self.state().get_pool_calls
    }

    pub fn push_transfer(&self, token: Address, leg: TransferLeg, value: U256) {
        let (from, to) = match leg {
            TransferLeg::Mint => (Address::ZERO, Address::repeat_byte(0xee)),
            TransferLeg::Burn => (Address::repeat_byte(0xee), Address::ZERO),
        };
        let ev = TransferEvent { leg, from, to, value };
        let mut state = self.state();
        if let Some(subs) = state.transfer_subs.get_mut(&(token, leg)) {
            subs.retain(|tx| tx.send(ev.clone()).is_ok());
        }
    }

    pub fn push_swap(&self, pool: Address, sqrt_price: U256, tick: i32, liquidity: u128) {
        let ev = SwapEvent {
            amount0: I256::ZERO,
            amount1: I256::ZERO,
            sqrt_price_x96: sqrt_price,
            liquidity,
            tick,
        };
        let mut state = self.state();
        if let Some(subs) = state.swap_subs.get_mut(&pool) {
            subs.retain(|tx| tx.send(ev.clone()).is_ok());
        }
    }

    pub fn push_block(&self, number: u64) {
        let mut state = self.state();
        state.block = number;
        state.block_subs.retain(|tx| tx.send(number).is_ok());
    }

    /// Live subscribers on a pool's swap feed
    pub fn swap_subscribers(&self, pool: Address) -> usize {
        let mut state = self.state();
        match state.swap_subs.get_mut(&pool) {
            Some(subs) => {
                subs.retain(|tx| !tx.is_closed());
                subs.len()
            }
            None => 0,
        }
    }

    fn check(&self, addr: Address) -> Result<()> {
        if self.state().failing.contains(&addr) {
            return Err(anyhow!("mock failure for {:?}", addr));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        self.check(token)?;
        self.state()
            .tokens
            .get(&token)
            .cloned()
            .ok_or_else(|| anyhow!("no contract at {:?}", token))
    }

    async fn total_supply(&self, token: Address) -> Result<U256> {
        self.check(token)?;
        self.state()
            .tokens
            .get(&token)
            .map(|m| m.total_supply)
            .ok_or_else(|| anyhow!("no contract at {:?}", token))
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        self.check(token)?;
        self.check(owner)?;
        Ok(self.state().balances.get(&(token, owner)).copied().unwrap_or(U256::ZERO))
    }

    async fn pool_snapshot(&self, pool: Address) -> Result<(Slot0, u128)> {
        self.check(pool)?;
        self.state()
            .snapshots
            .get(&pool)
            .copied()
            .ok_or_else(|| anyhow!("no pool at {:?}", pool))
    }

    async fn tick_spacing(&self, pool: Address) -> Result<i32> {
        self.check(pool)?;
        Ok(10)
    }

    async fn get_pool(&self, token0: Address, token1: Address, fee: u32) -> Result<Address> {
        let mut state = self.state();
        state.get_pool_calls += 1;
        Ok(state.factory.get(&(token0, token1, fee)).copied().unwrap_or(Address::ZERO))
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.state().block)
    }

    async fn subscribe_transfers(&self, token: Address, leg: TransferLeg) -> Result<EventStream<TransferEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().transfer_subs.entry((token, leg)).or_default().push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn subscribe_swaps(&self, pool: Address) -> Result<EventStream<SwapEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().swap_subs.entry(pool).or_default().push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn subscribe_blocks(&self) -> Result<EventStream<u64>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().block_subs.push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
