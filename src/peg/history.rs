//! On-chain price history
//!
//! The peg controller asks for the last observed price of a reference
//! asset (BTC, ETH) quoted in a stable. [`PoolPriceHistory`] answers from
//! the deepest tradable pool pairing the wrapped asset with that stable,
//! stamped with the pool's last observation time.
//!
//! Created: 2026-02-05

use crate::pool::PoolRegistry;
use crate::types::Pool;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

pub trait PriceHistory: Send + Sync {
    /// Start tracking `base` priced in `quote`
    fn track_pair(&self, base: &str, quote: &str);

    /// Last known `quote` per `base`
    fn last_price(&self, base: &str, quote: &str) -> Option<PricePoint>;
}

pub struct PoolPriceHistory {
    pools: PoolRegistry,
    tracked: RwLock<HashSet<(String, String)>>,
}

impl PoolPriceHistory {
    pub fn new(pools: PoolRegistry) -> Self {
        Self {
            pools,
            tracked: RwLock::new(HashSet::new()),
        }
    }

    fn key(base: &str, quote: &str) -> (String, String) {
        (base.to_uppercase(), quote.to_uppercase())
    }

    fn is_tracked(&self, base: &str, quote: &str) -> bool {
        self.tracked
            .read()
            .map(|t| t.contains(&Self::key(base, quote)))
            .unwrap_or(false)
    }

    pub fn tracked_pairs(&self) -> usize {
        self.tracked.read().map(|t| t.len()).unwrap_or(0)
    }
}

impl PriceHistory for PoolPriceHistory {
    fn track_pair(&self, base: &str, quote: &str) {
        if let Ok(mut tracked) = self.tracked.write() {
            if tracked.insert(Self::key(base, quote)) {
                debug!("Tracking on-chain {}/{}", base, quote);
            }
        }
    }

    fn last_price(&self, base: &str, quote: &str) -> Option<PricePoint> {
        if !self.is_tracked(base, quote) {
            return None;
        }
        let view = self.pools.market_view();
        let is_base = |pool: &Pool, side: alloy::primitives::Address| {
            view.token(side)
                .map(|t| t.is_active() && t.category.is_wrapped() && t.unwrapped_symbol().eq_ignore_ascii_case(base))
                .unwrap_or(false)
                && pool
                    .counterpart(side)
                    .and_then(|q| view.token(q))
                    .map(|t| t.is_active() && t.category.is_stable() && t.symbol.eq_ignore_ascii_case(quote))
                    .unwrap_or(false)
        };

        let (pool, base_token) = view
            .pools()
            .iter()
            .filter(|p| view.is_tradable(p))
            .filter_map(|p| {
                if is_base(p, p.token0()) {
                    Some((p, p.token0()))
                } else if is_base(p, p.token1()) {
                    Some((p, p.token1()))
                } else {
                    None
                }
            })
            .max_by_key(|(p, _)| p.liquidity)?;

        Some(PricePoint {
            price: view.price_in_counterpart(pool, base_token)?,
            observed_at: pool.last_observed()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{sqrt_price_x96, MockChain};
    use crate::throttle::RequestThrottleCache;
    use crate::token::TokenRegistry;
    use crate::types::TokenCategory;
    use alloy::primitives::{Address, U256};
    use std::sync::Arc;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[tokio::test]
    async fn test_last_price_from_wrapped_stable_pool() {
        let mock = Arc::new(MockChain::new());
        mock.add_token(addr(1), "USDT", 6, U256::from(1u64));
        mock.add_token(addr(2), "WBTC", 8, U256::from(1u64));
        let tokens = TokenRegistry::new(mock.clone(), addr(1), 4);
        tokens.add(addr(1), TokenCategory::UsdStable).await.unwrap();
        tokens.add(addr(2), TokenCategory::WrappedBtc).await.unwrap();

        // token0 = USDT (6), token1 = WBTC (8): 60000 USDT per BTC
        let raw = (1.0 / 60000.0) * 1e8 / 1e6;
        let reserves = (U256::from(1u64), U256::from(1u64));
        mock.add_pool(addr(0x10), addr(1), addr(2), 500, sqrt_price_x96(raw), reserves);

        let pools = PoolRegistry::new(
            mock.clone(),
            tokens,
            RequestThrottleCache::new(chrono::Duration::days(30)),
            4,
        );
        pools.add(addr(1), addr(2)).await.unwrap();

        let history = PoolPriceHistory::new(pools);
        assert!(history.last_price("BTC", "USDT").is_none());

        history.track_pair("BTC", "USDT");
        history.track_pair("btc", "usdt");
        assert_eq!(history.tracked_pairs(), 1);

        let point = history.last_price("BTC", "USDT").unwrap();
        assert!((point.price - 60000.0).abs() < 1e-3, "price {}", point.price);

        history.track_pair("ETH", "USDT");
        assert!(history.last_price("ETH", "USDT").is_none());
    }
}
