//! Alloy-backed chain client
//!
//! Reads go through the `sol!` contract bindings in [`crate::contracts`];
//! subscriptions use `eth_subscribe` over the provider's WebSocket.
//!
//! Created: 2026-02-03
//! Modified: 2026-02-04 - Log subscriptions for Transfer (mint/burn) and Swap

use super::{ChainClient, EventStream, SwapEvent, TokenMetadata, TransferEvent, TransferLeg};
use crate::contracts::{UniswapV3Factory, UniswapV3Pool, IERC20};
use crate::types::Slot0;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::warn;

/// Uniswap V3 fee tiers queried during pool discovery
pub const DISCOVERY_FEE_TIERS: [u32; 3] = [100, 500, 3000];

/// Convert a u32 fee tier to alloy's uint24 for contract calls.
/// `Uint<24, 1>` has no `From<u32>`, hence `from_limbs`.
fn fee_to_u24(fee: u32) -> alloy::primitives::Uint<24, 1> {
    debug_assert!(fee <= 0xFFFFFF, "fee {} exceeds U24 max (16777215)", fee);
    alloy::primitives::Uint::from_limbs([fee as u64])
}

/// Chain client over any alloy provider
pub struct AlloyChainClient<P> {
    provider: Arc<P>,
    factory: Address,
}

impl<P: Provider + 'static> AlloyChainClient<P> {
    pub fn new(provider: Arc<P>, factory: Address) -> Self {
        Self { provider, factory }
    }

    fn transfer_filter(token: Address, leg: TransferLeg) -> Filter {
        let zero = Address::ZERO.into_word();
        let filter = Filter::new()
            .address(token)
            .event_signature(IERC20::Transfer::SIGNATURE_HASH);
        match leg {
            TransferLeg::Mint => filter.topic1(zero),
            TransferLeg::Burn => filter.topic2(zero),
        }
    }
}

#[async_trait]
impl<P: Provider + 'static> ChainClient for AlloyChainClient<P> {
    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata> {
        let contract = IERC20::new(token, self.provider.clone());
        let name_call = contract.name();
        let symbol_call = contract.symbol();
        let decimals_call = contract.decimals();
        let supply_call = contract.totalSupply();

        let (name, symbol, decimals, total_supply) = tokio::try_join!(
            name_call.call(),
            symbol_call.call(),
            decimals_call.call(),
            supply_call.call()
        )
        .with_context(|| format!("Failed to fetch metadata for token {:?}", token))?;

        Ok(TokenMetadata {
            name,
            symbol,
            decimals,
            total_supply,
        })
    }

    async fn total_supply(&self, token: Address) -> Result<U256> {
        let contract = IERC20::new(token, self.provider.clone());
        contract
            .totalSupply()
            .call()
            .await
            .with_context(|| format!("Failed to get totalSupply of {:?}", token))
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        let contract = IERC20::new(token, self.provider.clone());
        contract
            .balanceOf(owner)
            .call()
            .await
            .with_context(|| format!("Failed to get balance of {:?} for {:?}", token, owner))
    }

    async fn pool_snapshot(&self, pool: Address) -> Result<(Slot0, u128)> {
        let contract = UniswapV3Pool::new(pool, self.provider.clone());
        let slot0_call = contract.slot0();
        let liq_call = contract.liquidity();
        let (slot0_res, liq_res) = tokio::join!(slot0_call.call(), liq_call.call());

        let slot0 = slot0_res.with_context(|| format!("Failed to get slot0 of {:?}", pool))?;
        let liquidity = liq_res.with_context(|| format!("Failed to get liquidity of {:?}", pool))?;

        Ok((
            Slot0 {
                sqrt_price_x96: U256::from(slot0.sqrtPriceX96),
                tick: i32::try_from(slot0.tick).unwrap_or(0),
                observation_index: slot0.observationIndex,
                observation_cardinality: slot0.observationCardinality,
                observation_cardinality_next: slot0.observationCardinalityNext,
                fee_protocol: slot0.feeProtocol,
                unlocked: slot0.unlocked,
            },
            liquidity,
        ))
    }

    async fn tick_spacing(&self, pool: Address) -> Result<i32> {
        let contract = UniswapV3Pool::new(pool, self.provider.clone());
        let spacing = contract
            .tickSpacing()
            .call()
            .await
            .with_context(|| format!("Failed to get tickSpacing of {:?}", pool))?;
        Ok(i32::try_from(spacing).unwrap_or(0))
    }

    async fn get_pool(&self, token0: Address, token1: Address, fee: u32) -> Result<Address> {
        let factory = UniswapV3Factory::new(self.factory, self.provider.clone());
        factory
            .getPool(token0, token1, fee_to_u24(fee))
            .call()
            .await
            .context("Failed to get V3 pool address")
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to get block number")
    }

    async fn subscribe_transfers(&self, token: Address, leg: TransferLeg) -> Result<EventStream<TransferEvent>> {
        let filter = Self::transfer_filter(token, leg);
        let sub = self
            .provider
            .subscribe_logs(&filter)
            .await
            .with_context(|| format!("Failed to subscribe to {:?} transfers of {:?}", leg, token))?;

        let stream = sub.into_stream().filter_map(move |log| async move {
            match log.log_decode::<IERC20::Transfer>() {
                Ok(decoded) => {
                    let ev = decoded.inner.data;
                    Some(TransferEvent {
                        leg,
                        from: ev.from,
                        to: ev.to,
                        value: ev.value,
                    })
                }
                Err(e) => {
                    warn!("Undecodable Transfer log for {:?}: {}", token, e);
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn subscribe_swaps(&self, pool: Address) -> Result<EventStream<SwapEvent>> {
        let filter = Filter::new()
            .address(pool)
            .event_signature(UniswapV3Pool::Swap::SIGNATURE_HASH);
        let sub = self
            .provider
            .subscribe_logs(&filter)
            .await
            .with_context(|| format!("Failed to subscribe to swaps of {:?}", pool))?;

        let stream = sub.into_stream().filter_map(move |log| async move {
            match log.log_decode::<UniswapV3Pool::Swap>() {
                Ok(decoded) => {
                    let ev = decoded.inner.data;
                    Some(SwapEvent {
                        amount0: ev.amount0,
                        amount1: ev.amount1,
                        sqrt_price_x96: U256::from(ev.sqrtPriceX96),
                        liquidity: ev.liquidity,
                        tick: i32::try_from(ev.tick).unwrap_or(0),
                    })
                }
                Err(e) => {
                    warn!("Undecodable Swap log for {:?}: {}", pool, e);
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn subscribe_blocks(&self) -> Result<EventStream<u64>> {
        let sub = self
            .provider
            .subscribe_blocks()
            .await
            .context("Failed to subscribe to new blocks")?;
        Ok(Box::pin(sub.into_stream().map(|header| header.number)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_to_u24() {
        for fee in DISCOVERY_FEE_TIERS {
            assert_eq!(fee_to_u24(fee).to::<u32>(), fee);
        }
    }

    #[test]
    fn test_transfer_filter_topics() {
        type Client = AlloyChainClient<alloy::providers::RootProvider>;
        let token = Address::repeat_byte(0x11);

        let mint = Client::transfer_filter(token, TransferLeg::Mint);
        assert!(mint.topics[1].contains(&Address::ZERO.into_word()));
        assert!(mint.topics[2].is_empty());

        let burn = Client::transfer_filter(token, TransferLeg::Burn);
        assert!(burn.topics[2].contains(&Address::ZERO.into_word()));
        assert!(burn.topics[1].is_empty());
    }
}
