//! Market snapshot and USD valuation
//!
//! [`MarketView`] is a point-in-time copy of both registries. Detection and
//! liquidity sweeps work on a view so no registry lock is held while they
//! run, and every price they read comes from the same moment.
//!
//! Valuation rules:
//! - stables are worth 1
//! - wrapped assets use the best-priced pool against the reference stable
//! - anything else uses the first active pool pairing it with a stable or
//!   wrapped token (one indirection at most)
//!
//! Liquidity is not weighted into any of these estimates.
//!
//! Created: 2026-02-04

use crate::pool::price;
use crate::types::{pool_key, Pool, Token, TokenCategory};
use alloy::primitives::Address;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// Point-in-time copy of tokens and pools
#[derive(Debug, Clone)]
pub struct MarketView {
    tokens: HashMap<Address, Token>,
    pools: Vec<Pool>,
    reference_stable: Address,
}

/// USD value of a pool's reserves and how many sides could be priced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolUsdValue {
    pub usd: f64,
    pub priced_sides: u8,
}

impl MarketView {
    pub fn new(tokens: Vec<Token>, mut pools: Vec<Pool>, reference_stable: Address) -> Self {
        pools.sort_by_key(|p| p.address);
        Self {
            tokens: tokens.into_iter().map(|t| (t.address, t)).collect(),
            pools,
            reference_stable,
        }
    }

    pub fn token(&self, address: Address) -> Option<&Token> {
        self.tokens.get(&address)
    }

    pub fn pool(&self, address: Address) -> Option<&Pool> {
        self.pools.iter().find(|p| p.address == address)
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    pub fn symbol(&self, address: Address) -> String {
        self.tokens
            .get(&address)
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| format!("{:?}", address))
    }

    pub fn pool_key(&self, pool: &Pool) -> String {
        pool_key(&self.symbol(pool.token0()), &self.symbol(pool.token1()), pool.fee)
    }

    fn token_active(&self, address: Address) -> bool {
        self.tokens.get(&address).map(|t| t.is_active()).unwrap_or(false)
    }

    /// Active pool whose two tokens are active as well
    pub fn is_tradable(&self, pool: &Pool) -> bool {
        pool.is_active() && self.token_active(pool.token0()) && self.token_active(pool.token1())
    }

    fn decimals(&self, pool: &Pool) -> Option<(u8, u8)> {
        Some((self.token(pool.token0())?.decimals, self.token(pool.token1())?.decimals))
    }

    /// token1 per token0; `None` without a usable price.
    pub fn price_token0_over_token1(&self, pool: &Pool) -> Option<f64> {
        let slot0 = pool.slot0?;
        let (d0, d1) = self.decimals(pool)?;
        let p = price::token0_price_in_token1(slot0.sqrt_price_x96, d0, d1);
        (p > 0.0 && p.is_finite()).then_some(p)
    }

    /// token0 per token1; `None` without a usable price.
    pub fn price_token1_over_token0(&self, pool: &Pool) -> Option<f64> {
        let slot0 = pool.slot0?;
        let (d0, d1) = self.decimals(pool)?;
        let p = price::token1_price_in_token0(slot0.sqrt_price_x96, d0, d1);
        (p > 0.0 && p.is_finite()).then_some(p)
    }

    /// Price of one `token` expressed in the pool's other token.
    pub fn price_in_counterpart(&self, pool: &Pool, token: Address) -> Option<f64> {
        if token == pool.token0() {
            self.price_token0_over_token1(pool)
        } else if token == pool.token1() {
            self.price_token1_over_token0(pool)
        } else {
            None
        }
    }

    /// Estimated USD value of one unit of `token`.
    pub fn estimate_usd_value(&self, token: Address) -> Option<f64> {
        let t = self.token(token)?;
        match t.category {
            TokenCategory::UsdStable => Some(1.0),
            TokenCategory::WrappedEth | TokenCategory::WrappedBtc => self.wrapped_usd_value(t),
            TokenCategory::Erc20 => self.erc20_usd_value(t),
        }
    }

    fn wrapped_usd_value(&self, token: &Token) -> Option<f64> {
        let best = self
            .pools
            .iter()
            .filter(|p| p.is_active() && p.involves(token.address) && p.involves(self.reference_stable))
            .filter_map(|p| self.price_in_counterpart(p, token.address))
            .fold(None, |best: Option<f64>, p| Some(best.map_or(p, |b| b.max(p))));

        if best.is_none() {
            warn!("No priced pool for {} against the reference stable", token.symbol);
        }
        best
    }

    fn erc20_usd_value(&self, token: &Token) -> Option<f64> {
        for pool in self.pools.iter().filter(|p| p.is_active() && p.involves(token.address)) {
            let Some(other) = pool.counterpart(token.address).and_then(|a| self.token(a)) else {
                continue;
            };
            if !other.is_active() {
                continue;
            }
            let Some(price) = self.price_in_counterpart(pool, token.address) else {
                continue;
            };
            let other_usd = match other.category {
                TokenCategory::UsdStable => Some(1.0),
                TokenCategory::WrappedEth | TokenCategory::WrappedBtc => self.wrapped_usd_value(other),
                TokenCategory::Erc20 => None,
            };
            if let Some(usd) = other_usd {
                return Some(price * usd);
            }
        }
        debug!("No USD route for {}", token.symbol);
        None
    }

    /// Sum of reserve × USD price per side.
    pub fn pool_usd_value(&self, pool: &Pool) -> PoolUsdValue {
        let mut value = PoolUsdValue {
            usd: 0.0,
            priced_sides: 0,
        };
        for (token, reserve) in [(pool.token0(), pool.reserve0), (pool.token1(), pool.reserve1)] {
            let Some(t) = self.token(token) else { continue };
            if let Some(usd) = self.estimate_usd_value(token) {
                value.usd += price::to_decimal(reserve, t.decimals) * usd;
                value.priced_sides += 1;
            }
        }
        value
    }

    /// Tradable pools transitively connected to `token` via shared endpoints.
    pub fn reachable_pools(&self, token: Address) -> Vec<&Pool> {
        let tradable: Vec<&Pool> = self.pools.iter().filter(|p| self.is_tradable(p)).collect();

        let mut seen_tokens: HashSet<Address> = HashSet::from([token]);
        let mut seen_pools: HashSet<Address> = HashSet::new();
        let mut queue: VecDeque<Address> = VecDeque::from([token]);
        let mut out = Vec::new();

        while let Some(current) = queue.pop_front() {
            for pool in tradable.iter().filter(|p| p.involves(current)) {
                if !seen_pools.insert(pool.address) {
                    continue;
                }
                out.push(*pool);
                if let Some(next) = pool.counterpart(current) {
                    if seen_tokens.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Slot0;
    use alloy::primitives::U256;
    use chrono::Utc;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn token(n: u8, symbol: &str, decimals: u8, category: TokenCategory) -> Token {
        Token {
            address: addr(n),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals,
            category,
            total_supply: U256::from(1u64),
            created_at: Utc::now(),
            disabled_at: None,
            last_fetch: None,
            last_supply_change: None,
        }
    }

    /// Pool where one token0 buys `ratio` token1, both 18 decimals
    fn pool(n: u8, a: u8, b: u8, ratio: f64) -> Pool {
        let mut p = Pool::new(addr(n), addr(a), addr(b), 500, Utc::now());
        p.slot0 = Some(Slot0 {
            sqrt_price_x96: U256::from((ratio.sqrt() * 2f64.powi(96)) as u128),
            ..Default::default()
        });
        p.reserve0 = U256::from(10u64).pow(U256::from(21u64));
        p.reserve1 = U256::from(10u64).pow(U256::from(21u64));
        p
    }

    fn view(pools: Vec<Pool>) -> MarketView {
        MarketView::new(
            vec![
                token(1, "USDT", 18, TokenCategory::UsdStable),
                token(2, "WETH", 18, TokenCategory::WrappedEth),
                token(3, "LINK", 18, TokenCategory::Erc20),
                token(4, "UNI", 18, TokenCategory::Erc20),
            ],
            pools,
            addr(1),
        )
    }

    #[test]
    fn test_stable_and_wrapped_valuation() {
        // token0 = USDT (0x01..), token1 = WETH (0x02..): 1 USDT = 0.0005 WETH
        let v = view(vec![pool(10, 1, 2, 0.0005), pool(11, 1, 2, 0.00049)]);
        assert_eq!(v.estimate_usd_value(addr(1)), Some(1.0));

        let weth = v.estimate_usd_value(addr(2)).unwrap();
        assert!((weth - 1.0 / 0.00049).abs() < 1e-3, "best priced pool wins, got {}", weth);
    }

    #[test]
    fn test_erc20_via_wrapped_counterpart() {
        // 1 WETH = 200 LINK -> LINK = 2000 / 200 = 10 USD
        let v = view(vec![pool(10, 1, 2, 0.0005), pool(12, 2, 3, 200.0)]);
        let link = v.estimate_usd_value(addr(3)).unwrap();
        assert!((link - 10.0).abs() < 1e-6, "got {}", link);

        // UNI has no stable/wrapped counterpart
        assert_eq!(v.estimate_usd_value(addr(4)), None);
    }

    #[test]
    fn test_reachable_pools_skip_disabled() {
        let mut disabled = pool(13, 3, 4, 1.0);
        disabled.disabled_at = Some(Utc::now());
        let v = view(vec![pool(10, 1, 2, 0.0005), pool(12, 2, 3, 200.0), disabled]);

        let reach: Vec<Address> = v.reachable_pools(addr(1)).iter().map(|p| p.address).collect();
        assert_eq!(reach.len(), 2);
        assert!(reach.contains(&addr(12)));
        assert!(v.reachable_pools(addr(4)).is_empty());
    }

    #[test]
    fn test_pool_usd_value() {
        let v = view(vec![pool(10, 1, 2, 0.0005), pool(14, 3, 4, 1.0)]);
        let both = v.pool_usd_value(v.pool(addr(10)).unwrap());
        assert_eq!(both.priced_sides, 2);
        assert!((both.usd - (1000.0 + 1000.0 * 2000.0)).abs() < 1.0);

        let none = v.pool_usd_value(v.pool(addr(14)).unwrap());
        assert_eq!(none.priced_sides, 0);
        assert_eq!(none.usd, 0.0);
    }
}
