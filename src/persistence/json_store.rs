//! JSON file state store
//!
//! One pretty-printed JSON file per collection under a state directory:
//! `tokens.json`, `pools.json`, `rpc_requests.json`. Writes go to a temp
//! file first and are renamed into place. A missing file loads as empty.
//!
//! Addresses and 256-bit integers are stored as strings; a record that
//! fails to convert back is skipped with a warning rather than failing
//! the whole load.
//!
//! Created: 2026-02-06

use super::StateStore;
use crate::throttle::{RpcMethod, ThrottleRecord};
use crate::types::{Pool, Slot0, Token, TokenCategory};
use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TOKENS_FILE: &str = "tokens.json";
const POOLS_FILE: &str = "pools.json";
const THROTTLE_FILE: &str = "rpc_requests.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub category: String,
    pub total_supply: String,
    pub created_at: DateTime<Utc>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub last_fetch: Option<DateTime<Utc>>,
    pub last_supply_change: Option<DateTime<Utc>>,
}

impl From<&Token> for StoredToken {
    fn from(t: &Token) -> Self {
        Self {
            address: format!("{:?}", t.address),
            symbol: t.symbol.clone(),
            name: t.name.clone(),
            decimals: t.decimals,
            category: t.category.to_string(),
            total_supply: t.total_supply.to_string(),
            created_at: t.created_at,
            disabled_at: t.disabled_at,
            last_fetch: t.last_fetch,
            last_supply_change: t.last_supply_change,
        }
    }
}

impl StoredToken {
    pub fn to_token(&self) -> Result<Token> {
        Ok(Token {
            address: parse_address(&self.address)?,
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            decimals: self.decimals,
            category: self.category.parse::<TokenCategory>().map_err(|e| anyhow!(e))?,
            total_supply: parse_u256(&self.total_supply)?,
            created_at: self.created_at,
            disabled_at: self.disabled_at,
            last_fetch: self.last_fetch,
            last_supply_change: self.last_supply_change,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSlot0 {
    pub sqrt_price_x96: String,
    pub tick: i32,
    pub observation_index: u16,
    pub observation_cardinality: u16,
    pub observation_cardinality_next: u16,
    pub fee_protocol: u8,
    pub unlocked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPool {
    pub address: String,
    pub token0: String,
    pub token1: String,
    pub fee: u32,
    pub tick_spacing: Option<i32>,
    pub slot0: Option<StoredSlot0>,
    pub liquidity: String,
    pub reserve0: String,
    pub reserve1: String,
    pub created_at: DateTime<Utc>,
    pub last_price_change: Option<DateTime<Utc>>,
    pub last_reserve_change: Option<DateTime<Utc>>,
    pub last_fetch: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
}

impl From<&Pool> for StoredPool {
    fn from(p: &Pool) -> Self {
        Self {
            address: format!("{:?}", p.address),
            token0: format!("{:?}", p.token0()),
            token1: format!("{:?}", p.token1()),
            fee: p.fee,
            tick_spacing: p.tick_spacing,
            slot0: p.slot0.map(|s| StoredSlot0 {
                sqrt_price_x96: s.sqrt_price_x96.to_string(),
                tick: s.tick,
                observation_index: s.observation_index,
                observation_cardinality: s.observation_cardinality,
                observation_cardinality_next: s.observation_cardinality_next,
                fee_protocol: s.fee_protocol,
                unlocked: s.unlocked,
            }),
            liquidity: p.liquidity.to_string(),
            reserve0: p.reserve0.to_string(),
            reserve1: p.reserve1.to_string(),
            created_at: p.created_at,
            last_price_change: p.last_price_change,
            last_reserve_change: p.last_reserve_change,
            last_fetch: p.last_fetch,
            disabled_at: p.disabled_at,
        }
    }
}

impl StoredPool {
    pub fn to_pool(&self) -> Result<Pool> {
        let mut pool = Pool::new(
            parse_address(&self.address)?,
            parse_address(&self.token0)?,
            parse_address(&self.token1)?,
            self.fee,
            self.created_at,
        );
        pool.tick_spacing = self.tick_spacing;
        pool.slot0 = match &self.slot0 {
            Some(s) => Some(Slot0 {
                sqrt_price_x96: parse_u256(&s.sqrt_price_x96)?,
                tick: s.tick,
                observation_index: s.observation_index,
                observation_cardinality: s.observation_cardinality,
                observation_cardinality_next: s.observation_cardinality_next,
                fee_protocol: s.fee_protocol,
                unlocked: s.unlocked,
            }),
            None => None,
        };
        pool.liquidity = self
            .liquidity
            .parse()
            .with_context(|| format!("Invalid liquidity '{}'", self.liquidity))?;
        pool.reserve0 = parse_u256(&self.reserve0)?;
        pool.reserve1 = parse_u256(&self.reserve1)?;
        pool.last_price_change = self.last_price_change;
        pool.last_reserve_change = self.last_reserve_change;
        pool.last_fetch = self.last_fetch;
        pool.disabled_at = self.disabled_at;
        Ok(pool)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredThrottleRecord {
    pub key: String,
    pub method: String,
    pub called_at: DateTime<Utc>,
}

impl From<&ThrottleRecord> for StoredThrottleRecord {
    fn from(r: &ThrottleRecord) -> Self {
        Self {
            key: r.key.clone(),
            method: r.method.to_string(),
            called_at: r.called_at,
        }
    }
}

impl StoredThrottleRecord {
    pub fn to_record(&self) -> Result<ThrottleRecord> {
        Ok(ThrottleRecord {
            key: self.key.clone(),
            method: self.method.parse::<RpcMethod>().map_err(|e| anyhow!(e))?,
            called_at: self.called_at,
        })
    }
}

fn parse_address(s: &str) -> Result<Address> {
    s.parse::<Address>()
        .with_context(|| format!("Invalid address '{}'", s))
}

fn parse_u256(s: &str) -> Result<U256> {
    s.parse::<U256>()
        .with_context(|| format!("Invalid integer '{}'", s))
}

pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.dir.join(file);
        if !path.exists() {
            debug!("No stored {}, starting empty", path.display());
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn write<T: Serialize>(&self, file: &str, items: &[T]) -> Result<()> {
        let path = self.dir.join(file);
        let json = serde_json::to_string_pretty(items)
            .with_context(|| format!("Failed to serialize {}", file))?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &json).context("Failed to write temp file")?;
        std::fs::rename(&temp_path, &path).context("Failed to rename temp file")?;
        debug!("Saved {} records to {}", items.len(), path.display());
        Ok(())
    }
}

/// Convert stored records, skipping the ones that do not round-trip.
fn convert<S, T>(file: &str, stored: Vec<S>, f: impl Fn(&S) -> Result<T>) -> Vec<T> {
    stored
        .iter()
        .filter_map(|s| match f(s) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Skipping invalid record in {}: {:#}", file, e);
                None
            }
        })
        .collect()
}

impl StateStore for JsonStateStore {
    fn load_tokens(&self) -> Result<Vec<Token>> {
        let stored: Vec<StoredToken> = self.read(TOKENS_FILE)?;
        Ok(convert(TOKENS_FILE, stored, StoredToken::to_token))
    }

    fn save_tokens(&self, tokens: &[Token]) -> Result<()> {
        let stored: Vec<StoredToken> = tokens.iter().map(StoredToken::from).collect();
        self.write(TOKENS_FILE, &stored)
    }

    fn load_pools(&self) -> Result<Vec<Pool>> {
        let stored: Vec<StoredPool> = self.read(POOLS_FILE)?;
        Ok(convert(POOLS_FILE, stored, StoredPool::to_pool))
    }

    fn save_pools(&self, pools: &[Pool]) -> Result<()> {
        let stored: Vec<StoredPool> = pools.iter().map(StoredPool::from).collect();
        self.write(POOLS_FILE, &stored)
    }

    fn load_throttle(&self) -> Result<Vec<ThrottleRecord>> {
        let stored: Vec<StoredThrottleRecord> = self.read(THROTTLE_FILE)?;
        Ok(convert(THROTTLE_FILE, stored, StoredThrottleRecord::to_record))
    }

    fn save_throttle(&self, records: &[ThrottleRecord]) -> Result<()> {
        let stored: Vec<StoredThrottleRecord> = records.iter().map(StoredThrottleRecord::from).collect();
        self.write(THROTTLE_FILE, &stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> Token {
        Token {
            address: Address::repeat_byte(0xaa),
            symbol: "WETH".to_string(),
            name: "Wrapped Ether".to_string(),
            decimals: 18,
            category: TokenCategory::WrappedEth,
            total_supply: U256::from(3_000_000_000_000_000_000_000u128),
            created_at: Utc::now(),
            disabled_at: None,
            last_fetch: Some(Utc::now()),
            last_supply_change: None,
        }
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state")).unwrap();
        assert!(store.load_tokens().unwrap().is_empty());
        assert!(store.load_pools().unwrap().is_empty());
        assert!(store.load_throttle().unwrap().is_empty());
    }

    #[test]
    fn test_pool_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();

        let now = Utc::now();
        let mut pool = Pool::new(Address::repeat_byte(0x10), Address::repeat_byte(2), Address::repeat_byte(1), 500, now);
        pool.tick_spacing = Some(10);
        pool.apply_snapshot(
            Slot0 {
                sqrt_price_x96: U256::from(1u128 << 96),
                tick: -12,
                unlocked: true,
                ..Default::default()
            },
            42,
            now,
        );
        pool.apply_reserves(U256::from(7u64), U256::from(9u64), now);
        pool.disabled_at = Some(now);

        store.save_pools(std::slice::from_ref(&pool)).unwrap();
        let loaded = store.load_pools().unwrap();
        assert_eq!(loaded, vec![pool]);
        assert_eq!(loaded[0].token0(), Address::repeat_byte(1));
        assert!(!dir.path().join("pools.tmp").exists());
    }

    #[test]
    fn test_invalid_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        let token = sample_token();
        store.save_tokens(std::slice::from_ref(&token)).unwrap();

        let mut stored: Vec<StoredToken> = store.read(TOKENS_FILE).unwrap();
        let mut bad = stored[0].clone();
        bad.category = "meme".to_string();
        stored.push(bad);
        store.write(TOKENS_FILE, &stored).unwrap();

        assert_eq!(store.load_tokens().unwrap(), vec![token]);
    }

    #[test]
    fn test_throttle_records_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        let record = ThrottleRecord {
            key: "USDT-WETH".to_string(),
            method: RpcMethod::GetPool,
            called_at: Utc::now(),
        };
        store.save_throttle(std::slice::from_ref(&record)).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(THROTTLE_FILE)).unwrap();
        assert!(raw.contains("getPool"));
        assert_eq!(store.load_throttle().unwrap(), vec![record]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(POOLS_FILE), "{ not json").unwrap();
        let store = JsonStateStore::new(dir.path()).unwrap();
        tokio_test::assert_err!(store.load_pools());
    }
}
