//! Core domain types
//!
//! Tokens, pools, price snapshots and the ephemeral arbitrage
//! opportunity produced by the detector.
//!
//! Created: 2026-02-03
//! Modified: 2026-02-05 - Pool reserve/price change bookkeeping

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Token classification, drives valuation and detection rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenCategory {
    /// Plain ERC20 token
    Erc20,
    /// USD-pegged stablecoin
    #[serde(rename = "usd_erc20")]
    UsdStable,
    /// Wrapped ether (WETH, stETH, ...)
    WrappedEth,
    /// Wrapped bitcoin (WBTC, ...)
    WrappedBtc,
}

impl TokenCategory {
    pub fn is_stable(&self) -> bool {
        match self {
            TokenCategory::UsdStable => true,
            TokenCategory::Erc20 | TokenCategory::WrappedEth | TokenCategory::WrappedBtc => false,
        }
    }

    pub fn is_wrapped(&self) -> bool {
        match self {
            TokenCategory::WrappedEth | TokenCategory::WrappedBtc => true,
            TokenCategory::Erc20 | TokenCategory::UsdStable => false,
        }
    }

    /// Reference asset a wrapped token stands for
    pub fn base_asset(&self) -> Option<&'static str> {
        match self {
            TokenCategory::WrappedBtc => Some("BTC"),
            TokenCategory::WrappedEth => Some("ETH"),
            TokenCategory::Erc20 | TokenCategory::UsdStable => None,
        }
    }

    /// Name used in descriptor files and persisted state
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenCategory::Erc20 => "erc20",
            TokenCategory::UsdStable => "usd_erc20",
            TokenCategory::WrappedEth => "wrapped_eth",
            TokenCategory::WrappedBtc => "wrapped_btc",
        }
    }
}

impl fmt::Display for TokenCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TokenCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "erc20" => Ok(TokenCategory::Erc20),
            "usd_erc20" => Ok(TokenCategory::UsdStable),
            "wrapped_eth" => Ok(TokenCategory::WrappedEth),
            "wrapped_btc" => Ok(TokenCategory::WrappedBtc),
            other => Err(format!("unknown token category '{}'", other)),
        }
    }
}

/// Cached ERC20 state
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub category: TokenCategory,
    pub total_supply: U256,
    pub created_at: DateTime<Utc>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_supply_change: Option<DateTime<Utc>>,
}

impl Token {
    pub fn is_active(&self) -> bool {
        self.disabled_at.is_none()
    }

    /// Underlying asset symbol: `BTC`/`ETH` for wrapped tokens whatever
    /// their own symbol (WBTC, cbBTC, stETH), the token symbol otherwise.
    pub fn unwrapped_symbol(&self) -> &str {
        match self.category.base_asset() {
            Some(base) => base,
            None => &self.symbol,
        }
    }

    /// Apply a freshly read supply.
    ///
    /// The change timestamp moves only when both the cached and the new
    /// value are non-zero and they differ, so first population is not a change.
    pub fn apply_total_supply(&mut self, supply: U256, now: DateTime<Utc>) -> bool {
        let changed = supply != self.total_supply;
        if changed && !self.total_supply.is_zero() && !supply.is_zero() {
            self.last_supply_change = Some(now);
        }
        self.total_supply = supply;
        changed
    }
}

/// Uniswap V3 `slot0()` tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slot0 {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub observation_index: u16,
    pub observation_cardinality: u16,
    pub observation_cardinality_next: u16,
    pub fee_protocol: u8,
    pub unlocked: bool,
}

/// Cached V3 pool state
///
/// token0.address < token1.address always holds; enforced by
/// [`Pool::new`], the only constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    pub address: Address,
    token0: Address,
    token1: Address,
    pub fee: u32,
    pub tick_spacing: Option<i32>,
    pub slot0: Option<Slot0>,
    pub liquidity: u128,
    pub reserve0: U256,
    pub reserve1: U256,
    pub created_at: DateTime<Utc>,
    pub last_price_change: Option<DateTime<Utc>>,
    pub last_reserve_change: Option<DateTime<Utc>>,
    pub last_fetch: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl Pool {
    /// Build a pool, sorting the pair by address.
    pub fn new(address: Address, token_a: Address, token_b: Address, fee: u32, now: DateTime<Utc>) -> Self {
        let (token0, token1) = sort_tokens(token_a, token_b);
        Self {
            address,
            token0,
            token1,
            fee,
            tick_spacing: None,
            slot0: None,
            liquidity: 0,
            reserve0: U256::ZERO,
            reserve1: U256::ZERO,
            created_at: now,
            last_price_change: None,
            last_reserve_change: None,
            last_fetch: None,
            disabled_at: None,
        }
    }

    pub fn token0(&self) -> Address {
        self.token0
    }

    pub fn token1(&self) -> Address {
        self.token1
    }

    pub fn is_active(&self) -> bool {
        self.disabled_at.is_none()
    }

    pub fn involves(&self, token: Address) -> bool {
        self.token0 == token || self.token1 == token
    }

    /// The other side of the pair, if `token` is part of it.
    pub fn counterpart(&self, token: Address) -> Option<Address> {
        if token == self.token0 {
            Some(self.token1)
        } else if token == self.token1 {
            Some(self.token0)
        } else {
            None
        }
    }

    /// Apply a price snapshot + liquidity read. Returns true if the price moved.
    pub fn apply_snapshot(&mut self, slot0: Slot0, liquidity: u128, now: DateTime<Utc>) -> bool {
        let moved = self.slot0.map(|s| s.sqrt_price_x96) != Some(slot0.sqrt_price_x96);
        if moved {
            self.last_price_change = Some(now);
        }
        self.slot0 = Some(slot0);
        self.liquidity = liquidity;
        moved
    }

    /// Apply a reserve read.
    ///
    /// The change timestamp moves only when both previous reserves were
    /// non-zero and at least one differs.
    pub fn apply_reserves(&mut self, reserve0: U256, reserve1: U256, now: DateTime<Utc>) -> bool {
        let changed = reserve0 != self.reserve0 || reserve1 != self.reserve1;
        if changed && !self.reserve0.is_zero() && !self.reserve1.is_zero() {
            self.last_reserve_change = Some(now);
        }
        self.reserve0 = reserve0;
        self.reserve1 = reserve1;
        changed
    }

    /// Apply the price fields carried by a swap event.
    pub fn apply_swap(&mut self, sqrt_price_x96: U256, tick: i32, liquidity: u128, now: DateTime<Utc>) -> bool {
        let mut slot0 = self.slot0.unwrap_or_default();
        let moved = slot0.sqrt_price_x96 != sqrt_price_x96;
        slot0.sqrt_price_x96 = sqrt_price_x96;
        slot0.tick = tick;
        self.slot0 = Some(slot0);
        self.liquidity = liquidity;
        if moved {
            self.last_price_change = Some(now);
        }
        moved
    }

    /// Most recent time the cached price was confirmed or changed.
    pub fn last_observed(&self) -> Option<DateTime<Utc>> {
        match (self.last_price_change, self.last_fetch) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Order two token addresses so that the first is the lower one.
pub fn sort_tokens(a: Address, b: Address) -> (Address, Address) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Human pool key: `SYM0-SYM1-FEE`
pub fn pool_key(symbol0: &str, symbol1: &str, fee: u32) -> String {
    format!("{}-{}-{}", symbol0, symbol1, fee)
}

/// A profitable closed cycle found by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    /// Closed token path, first == last
    pub path: Vec<Address>,
    /// Pools traversed, one per hop
    pub pools: Vec<Address>,
    pub return_ratio: f64,
    /// Token the profit was valued in
    pub base_token: Address,
    pub profit_usd: f64,
}

impl Opportunity {
    pub fn hops(&self) -> usize {
        self.pools.len()
    }
}

/// Audit record written once per emitted opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityRecord {
    pub detected_at: DateTime<Utc>,
    pub pool: String,
    pub pool_key: String,
    pub base_token: String,
    pub base_symbol: String,
    pub path: Vec<String>,
    pub path_symbols: Vec<String>,
    pub pools: Vec<String>,
    pub return_ratio: f64,
    pub profit_usd: f64,
}
