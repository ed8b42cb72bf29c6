//! Token Registry
//!
//! Thread-safe token cache keyed by address. Each token entry in the
//! DashMap doubles as that token's lock: reads and RPC fetches happen
//! outside the entry, results are applied inside a short `get_mut`.
//!
//! Supply is tracked incrementally from mint/burn Transfer events; the
//! periodic `refresh` re-reads totalSupply to correct any missed event.
//!
//! Created: 2026-02-03
//! Modified: 2026-02-05 - Disable/enable cascade to pools

use crate::chain::{ChainClient, TransferEvent, TransferLeg, WatchHandle};
use crate::error::RegistryError;
use crate::pool::PoolRegistry;
use crate::types::{Token, TokenCategory};
use alloy::primitives::{Address, U256};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared token registry handle
#[derive(Clone)]
pub struct TokenRegistry {
    tokens: Arc<DashMap<Address, Token>>,
    watchers: Arc<DashMap<Address, WatchHandle>>,
    chain: Arc<dyn ChainClient>,
    reference_stable: Address,
    concurrency: usize,
}

impl TokenRegistry {
    pub fn new(chain: Arc<dyn ChainClient>, reference_stable: Address, concurrency: usize) -> Self {
        Self {
            tokens: Arc::new(DashMap::new()),
            watchers: Arc::new(DashMap::new()),
            chain,
            reference_stable,
            concurrency: concurrency.max(1),
        }
    }

    pub fn reference_stable(&self) -> Address {
        self.reference_stable
    }

    pub fn get(&self, address: Address) -> Option<Token> {
        self.tokens.get(&address).map(|t| t.clone())
    }

    pub fn contains(&self, address: Address) -> bool {
        self.tokens.contains_key(&address)
    }

    pub fn is_active(&self, address: Address) -> bool {
        self.tokens.get(&address).map(|t| t.is_active()).unwrap_or(false)
    }

    pub fn all(&self) -> Vec<Token> {
        self.tokens.iter().map(|t| t.value().clone()).collect()
    }

    pub fn active(&self) -> Vec<Token> {
        self.tokens
            .iter()
            .filter(|t| t.is_active())
            .map(|t| t.value().clone())
            .collect()
    }

    pub fn by_category(&self, category: TokenCategory) -> Vec<Token> {
        self.tokens
            .iter()
            .filter(|t| t.category == category)
            .map(|t| t.value().clone())
            .collect()
    }

    /// Active token whose unwrapped symbol matches, case-insensitively.
    pub fn find_by_symbol(&self, symbol: &str) -> Option<Token> {
        self.tokens
            .iter()
            .find(|t| t.is_active() && t.unwrapped_symbol().eq_ignore_ascii_case(symbol))
            .map(|t| t.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Seed from persisted state. Existing entries are left untouched.
    pub fn load(&self, tokens: Vec<Token>) -> usize {
        let mut loaded = 0;
        for token in tokens {
            if let Entry::Vacant(slot) = self.tokens.entry(token.address) {
                slot.insert(token);
                loaded += 1;
            }
        }
        loaded
    }

    /// Fetch metadata and admit a new token.
    pub async fn add(&self, address: Address, category: TokenCategory) -> Result<Token, RegistryError> {
        if self.tokens.contains_key(&address) {
            return Err(RegistryError::AlreadyExists(address));
        }

        let meta = self
            .chain
            .token_metadata(address)
            .await
            .map_err(|e| RegistryError::fetch(format!("token {:?}", address), e))?;

        let now = Utc::now();
        let token = Token {
            address,
            symbol: meta.symbol,
            name: meta.name,
            decimals: meta.decimals,
            category,
            total_supply: meta.total_supply,
            created_at: now,
            disabled_at: None,
            last_fetch: Some(now),
            last_supply_change: None,
        };

        match self.tokens.entry(address) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(address)),
            Entry::Vacant(slot) => {
                info!("➕ Token added: {} ({}) {:?}", token.symbol, category, address);
                slot.insert(token.clone());
                Ok(token)
            }
        }
    }

    /// Disable a token, stop its subscriptions and disable every pool using it.
    pub async fn disable(&self, address: Address, pools: &PoolRegistry) -> Result<bool, RegistryError> {
        let symbol = {
            let mut token = self.tokens.get_mut(&address).ok_or(RegistryError::UnknownToken(address))?;
            if !token.is_active() {
                return Ok(false);
            }
            token.disabled_at = Some(Utc::now());
            token.symbol.clone()
        };

        self.stop_watching_events(address);
        let cascaded = pools.disable_for_token(address).await;
        info!("⛔ Token disabled: {} {:?} ({} pools disabled)", symbol, address, cascaded);
        Ok(true)
    }

    /// Re-enable a token, re-fetch its metadata, resubscribe, and re-enable
    /// every pool referencing it.
    ///
    /// Pools are re-enabled even when their other token is still disabled.
    pub async fn enable(&self, address: Address, pools: &PoolRegistry) -> Result<bool, RegistryError> {
        {
            let mut token = self.tokens.get_mut(&address).ok_or(RegistryError::UnknownToken(address))?;
            if token.is_active() {
                return Ok(false);
            }
            token.disabled_at = None;
        }

        match self.chain.token_metadata(address).await {
            Ok(meta) => {
                if let Some(mut token) = self.tokens.get_mut(&address) {
                    let now = Utc::now();
                    token.name = meta.name;
                    token.symbol = meta.symbol;
                    token.decimals = meta.decimals;
                    token.apply_total_supply(meta.total_supply, now);
                    token.last_fetch = Some(now);
                }
            }
            Err(e) => warn!("Failed to re-fetch metadata for re-enabled token {:?}: {:#}", address, e),
        }

        if let Err(e) = self.watch_events(address).await {
            warn!("Failed to resubscribe token {:?}: {}", address, e);
        }

        let cascaded = pools.enable_for_token(address).await;
        info!("✅ Token enabled: {:?} ({} pools re-enabled)", address, cascaded);
        Ok(true)
    }

    /// Re-read totalSupply. `Ok(false)` when the read failed.
    pub async fn refresh(&self, address: Address) -> Result<bool, RegistryError> {
        let symbol = {
            let token = self.tokens.get(&address).ok_or(RegistryError::UnknownToken(address))?;
            if !token.is_active() {
                return Err(RegistryError::TokenDisabled(address));
            }
            token.symbol.clone()
        };

        let supply = match self.chain.total_supply(address).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to refresh token {} {:?}: {:#}", symbol, address, e);
                return Ok(false);
            }
        };

        let Some(mut token) = self.tokens.get_mut(&address) else {
            return Ok(false);
        };
        if !token.is_active() {
            return Ok(false);
        }
        let now = Utc::now();
        if token.apply_total_supply(supply, now) {
            debug!("Token {} supply now {}", token.symbol, supply);
        }
        token.last_fetch = Some(now);
        Ok(true)
    }

    /// Refresh every active token through the concurrency cap.
    pub async fn refresh_all(&self) -> usize {
        let addresses: Vec<Address> = self.active().iter().map(|t| t.address).collect();
        let results: Vec<bool> = stream::iter(addresses)
            .map(|addr| async move { matches!(self.refresh(addr).await, Ok(true)) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.into_iter().filter(|ok| *ok).count()
    }

    /// balanceOf read that refuses disabled tokens.
    pub async fn balance_of(&self, token: Address, owner: Address) -> Result<U256, RegistryError> {
        if !self.tokens.contains_key(&token) {
            return Err(RegistryError::UnknownToken(token));
        }
        if !self.is_active(token) {
            return Err(RegistryError::TokenDisabled(token));
        }
        self.chain
            .balance_of(token, owner)
            .await
            .map_err(|e| RegistryError::fetch(format!("balance of {:?} in {:?}", owner, token), e))
    }

    pub fn is_watching(&self, address: Address) -> bool {
        self.watchers
            .get(&address)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Subscribe to mint and burn transfers. Returns `Ok(false)` when
    /// already watching.
    pub async fn watch_events(&self, address: Address) -> Result<bool, RegistryError> {
        let symbol = {
            let token = self.tokens.get(&address).ok_or(RegistryError::UnknownToken(address))?;
            if !token.is_active() {
                return Err(RegistryError::TokenDisabled(address));
            }
            token.symbol.clone()
        };
        if self.is_watching(address) {
            return Ok(false);
        }

        let mints = self
            .chain
            .subscribe_transfers(address, TransferLeg::Mint)
            .await
            .map_err(|e| RegistryError::subscription(format!("{} mints", symbol), e))?;
        let burns = self
            .chain
            .subscribe_transfers(address, TransferLeg::Burn)
            .await
            .map_err(|e| RegistryError::subscription(format!("{} burns", symbol), e))?;

        let tokens = self.tokens.clone();
        let task_symbol = symbol.clone();
        let task = tokio::spawn(async move {
            let mut events = stream::select(mints, burns);
            while let Some(event) = events.next().await {
                apply_transfer(&tokens, address, &event);
            }
            warn!("Transfer stream ended for {} {:?}", task_symbol, address);
        });
        let handle = WatchHandle::new(task);

        match self.watchers.entry(address) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_finished() {
                    // Lost a race with a concurrent watch; the new handle is dropped.
                    return Ok(false);
                }
                slot.insert(handle);
            }
            Entry::Vacant(slot) => {
                slot.insert(handle);
            }
        }
        debug!("👀 Watching transfers of {} {:?}", symbol, address);
        Ok(true)
    }

    pub fn stop_watching_events(&self, address: Address) -> bool {
        match self.watchers.remove(&address) {
            Some((_, handle)) => {
                handle.cancel();
                debug!("Stopped watching token {:?}", address);
                true
            }
            None => false,
        }
    }

    /// Watch every active token through the concurrency cap.
    pub async fn watch_all(&self) -> usize {
        let addresses: Vec<Address> = self.active().iter().map(|t| t.address).collect();
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
                Err(e) => warn!("Token watch failed: {}", e),
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

/// Adjust cached supply from a mint or burn without re-fetching.
fn apply_transfer(tokens: &DashMap<Address, Token>, address: Address, event: &TransferEvent) {
    let Some(mut token) = tokens.get_mut(&address) else {
        return;
    };
    if !token.is_active() {
        return;
    }
    let supply = match event.leg {
        TransferLeg::Mint => token.total_supply.saturating_add(event.value),
        TransferLeg::Burn => token.total_supply.saturating_sub(event.value),
    };
    token.apply_total_supply(supply, Utc::now());
    debug!(
        "{:?} {} {} -> supply {}",
        event.leg, event.value, token.symbol, token.total_supply
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::throttle::RequestThrottleCache;
    use std::time::Duration;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn setup() -> (Arc<MockChain>, TokenRegistry, PoolRegistry) {
        let mock = Arc::new(MockChain::new());
        let tokens = TokenRegistry::new(mock.clone(), addr(0xaa), 4);
        let pools = PoolRegistry::new(
            mock.clone(),
            tokens.clone(),
            RequestThrottleCache::new(chrono::Duration::days(30)),
            4,
        );
        (mock, tokens, pools)
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_add_is_case_insensitive() {
        let (mock, tokens, _) = setup();
        let lower: Address = "0x6b175474e89094c44da98b954eedeac495271d0f".parse().unwrap();
        let mixed: Address = "0x6B175474E89094C44Da98b954EedeAC495271d0F".parse().unwrap();
        mock.add_token(lower, "DAI", 18, U256::from(1000u64));

        assert!(tokens.add(lower, TokenCategory::UsdStable).await.is_ok());
        let second = tokens.add(mixed, TokenCategory::UsdStable).await;
        assert!(matches!(second, Err(RegistryError::AlreadyExists(_))));
        assert_eq!(tokens.active().len(), 1);
    }

    #[tokio::test]
    async fn test_add_fetch_failure_adds_nothing() {
        let (_mock, tokens, _) = setup();
        let result = tokens.add(addr(1), TokenCategory::Erc20).await;
        assert!(matches!(result, Err(RegistryError::FetchFailed { .. })));
        assert!(tokens.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_updates_supply_and_timestamp() {
        let (mock, tokens, _) = setup();
        mock.add_token(addr(1), "AAA", 18, U256::from(1000u64));
        tokens.add(addr(1), TokenCategory::Erc20).await.unwrap();

        assert_eq!(tokens.refresh(addr(1)).await.unwrap(), true);
        assert!(tokens.get(addr(1)).unwrap().last_supply_change.is_none());

        mock.set_supply(addr(1), U256::from(1500u64));
        tokens.refresh(addr(1)).await.unwrap();
        let token = tokens.get(addr(1)).unwrap();
        assert_eq!(token.total_supply, U256::from(1500u64));
        assert!(token.last_supply_change.is_some());

        mock.fail(addr(1));
        assert_eq!(tokens.refresh(addr(1)).await.unwrap(), false);
        assert_eq!(tokens.get(addr(1)).unwrap().total_supply, U256::from(1500u64));
    }

    #[tokio::test]
    async fn test_disabled_token_fails_fast() {
        let (mock, tokens, pools) = setup();
        mock.add_token(addr(1), "AAA", 18, U256::from(1000u64));
        tokens.add(addr(1), TokenCategory::Erc20).await.unwrap();

        assert!(tokens.disable(addr(1), &pools).await.unwrap());
        assert!(!tokens.disable(addr(1), &pools).await.unwrap());
        assert!(matches!(tokens.refresh(addr(1)).await, Err(RegistryError::TokenDisabled(_))));
        assert!(matches!(tokens.watch_events(addr(1)).await, Err(RegistryError::TokenDisabled(_))));
        assert!(matches!(
            tokens.balance_of(addr(1), addr(2)).await,
            Err(RegistryError::TokenDisabled(_))
        ));
        assert!(matches!(
            tokens.refresh(addr(9)).await,
            Err(RegistryError::UnknownToken(_))
        ));
    }

    #[tokio::test]
    async fn test_mint_and_burn_events_adjust_supply() {
        let (mock, tokens, _) = setup();
        mock.add_token(addr(1), "AAA", 18, U256::from(1000u64));
        tokens.add(addr(1), TokenCategory::Erc20).await.unwrap();

        assert!(tokens.watch_events(addr(1)).await.unwrap());
        assert!(!tokens.watch_events(addr(1)).await.unwrap());
        assert!(tokens.is_watching(addr(1)));

        mock.push_transfer(addr(1), TransferLeg::Mint, U256::from(500u64));
        wait_for(|| tokens.get(addr(1)).unwrap().total_supply == U256::from(1500u64)).await;

        mock.push_transfer(addr(1), TransferLeg::Burn, U256::from(200u64));
        wait_for(|| tokens.get(addr(1)).unwrap().total_supply == U256::from(1300u64)).await;
        assert!(tokens.get(addr(1)).unwrap().last_supply_change.is_some());

        assert!(tokens.stop_watching_events(addr(1)));
        assert!(!tokens.is_watching(addr(1)));
        assert!(!tokens.stop_watching_events(addr(1)));
    }

    #[tokio::test]
    async fn test_find_by_unwrapped_symbol() {
        let (mock, tokens, _) = setup();
        mock.add_token(addr(1), "WBTC", 8, U256::from(1000u64));
        tokens.add(addr(1), TokenCategory::WrappedBtc).await.unwrap();

        assert_eq!(tokens.find_by_symbol("btc").map(|t| t.address), Some(addr(1)));
        assert!(tokens.find_by_symbol("ETH").is_none());
        assert_eq!(tokens.by_category(TokenCategory::WrappedBtc).len(), 1);
    }
}
