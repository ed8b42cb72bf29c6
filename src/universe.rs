//! Token universe descriptor
//!
//! The descriptor is a JSON object mapping category name to a list of token
//! contract addresses:
//!
//! ```json
//! { "usd_erc20": ["0xdAC1..."], "wrapped_eth": ["0xC02a..."], "erc20": [] }
//! ```
//!
//! Bad categories or addresses are rejected one entry at a time; a document
//! that does not parse at all is an error for the caller to handle.
//!
//! Created: 2026-02-06

use crate::token::TokenRegistry;
use crate::types::TokenCategory;
use alloy::primitives::Address;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniverseEntry {
    pub address: Address,
    pub category: TokenCategory,
}

/// A descriptor entry that was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryError {
    pub category: String,
    pub value: String,
    pub reason: String,
}

impl std::fmt::Display for EntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}': {}", self.category, self.value, self.reason)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct UniverseDiff {
    /// Not in the registry yet
    pub to_add: Vec<UniverseEntry>,
    /// Known but disabled
    pub to_enable: Vec<Address>,
    /// Active in the registry but absent from the descriptor
    pub to_disable: Vec<Address>,
}

impl UniverseDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_enable.is_empty() && self.to_disable.is_empty()
    }
}

/// Parse descriptor text. The reference stable is always part of the
/// result, as `usd_erc20`. Categories are read in file order and the first
/// category an address appears under wins.
pub fn parse_descriptor(text: &str, reference_stable: Address) -> Result<(Vec<UniverseEntry>, Vec<EntryError>)> {
    let raw: IndexMap<String, Vec<String>> =
        serde_json::from_str(text).context("Token universe descriptor is not a category -> addresses map")?;

    let mut entries = vec![UniverseEntry {
        address: reference_stable,
        category: TokenCategory::UsdStable,
    }];
    let mut seen: HashSet<Address> = HashSet::from([reference_stable]);
    let mut errors = Vec::new();

    for (category_name, addresses) in raw {
        let category = match category_name.parse::<TokenCategory>() {
            Ok(c) => c,
            Err(reason) => {
                errors.extend(addresses.into_iter().map(|value| EntryError {
                    category: category_name.clone(),
                    value,
                    reason: reason.clone(),
                }));
                continue;
            }
        };

        for value in addresses {
            match value.trim().to_lowercase().parse::<Address>() {
                Ok(address) => {
                    if seen.insert(address) {
                        entries.push(UniverseEntry { address, category });
                    }
                }
                Err(e) => errors.push(EntryError {
                    category: category_name.clone(),
                    value,
                    reason: e.to_string(),
                }),
            }
        }
    }

    Ok((entries, errors))
}

pub fn load_descriptor<P: AsRef<Path>>(path: P, reference_stable: Address) -> Result<(Vec<UniverseEntry>, Vec<EntryError>)> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read token universe {}", path.as_ref().display()))?;
    parse_descriptor(&text, reference_stable)
}

/// Compare the descriptor against the registry.
pub fn diff(entries: &[UniverseEntry], tokens: &TokenRegistry) -> UniverseDiff {
    let wanted: HashSet<Address> = entries.iter().map(|e| e.address).collect();
    let mut out = UniverseDiff::default();

    for entry in entries {
        match tokens.get(entry.address) {
            None => out.to_add.push(*entry),
            Some(t) if !t.is_active() => out.to_enable.push(entry.address),
            Some(_) => {}
        }
    }

    out.to_disable = tokens
        .active()
        .into_iter()
        .map(|t| t.address)
        .filter(|a| !wanted.contains(a))
        .collect();
    out.to_disable.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::pool::PoolRegistry;
    use crate::throttle::RequestThrottleCache;
    use alloy::primitives::U256;
    use std::sync::Arc;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[test]
    fn test_parse_keeps_valid_and_reports_bad_entries() {
        let text = format!(
            r#"{{
                "wrapped_eth": ["{:?}", "0x1234"],
                "meme": ["{:?}"],
                "erc20": ["{:?}", " {:?} "]
            }}"#,
            addr(2),
            addr(3),
            addr(4),
            addr(4),
        );
        let (entries, errors) = parse_descriptor(&text, addr(1)).unwrap();

        assert_eq!(
            entries,
            vec![
                UniverseEntry { address: addr(1), category: TokenCategory::UsdStable },
                UniverseEntry { address: addr(2), category: TokenCategory::WrappedEth },
                UniverseEntry { address: addr(4), category: TokenCategory::Erc20 },
            ]
        );
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.value == "0x1234"));
        assert!(errors.iter().any(|e| e.category == "meme"));
    }

    #[test]
    fn test_first_category_in_file_order_wins() {
        let text = format!(
            r#"{{ "wrapped_eth": ["{:?}"], "erc20": ["{:?}"] }}"#,
            addr(2),
            addr(2),
        );
        let (entries, _) = parse_descriptor(&text, addr(1)).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].category, TokenCategory::WrappedEth);

        let text = format!(
            r#"{{ "erc20": ["{:?}"], "wrapped_eth": ["{:?}"] }}"#,
            addr(2),
            addr(2),
        );
        let (entries, _) = parse_descriptor(&text, addr(1)).unwrap();
        assert_eq!(entries[1].category, TokenCategory::Erc20);
    }

    #[test]
    fn test_unparsable_document_is_an_error() {
        assert!(parse_descriptor("[1, 2]", addr(1)).is_err());
        assert!(parse_descriptor("{", addr(1)).is_err());
    }

    #[test]
    fn test_reference_stable_always_present() {
        let (entries, errors) = parse_descriptor("{}", addr(1)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].category, TokenCategory::UsdStable);
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn test_diff_against_registry() {
        let mock = Arc::new(MockChain::new());
        for (n, sym) in [(1, "USDT"), (2, "WETH"), (3, "LINK")] {
            mock.add_token(addr(n), sym, 18, U256::from(1_000u64));
        }
        let tokens = TokenRegistry::new(mock.clone(), addr(1), 4);
        let pools = PoolRegistry::new(mock.clone(), tokens.clone(), RequestThrottleCache::new(chrono::Duration::days(30)), 4);
        tokens.add(addr(1), TokenCategory::UsdStable).await.unwrap();
        tokens.add(addr(2), TokenCategory::WrappedEth).await.unwrap();
        tokens.add(addr(3), TokenCategory::Erc20).await.unwrap();
        tokens.disable(addr(2), &pools).await.unwrap();

        let entries = vec![
            UniverseEntry { address: addr(1), category: TokenCategory::UsdStable },
            UniverseEntry { address: addr(2), category: TokenCategory::WrappedEth },
            UniverseEntry { address: addr(5), category: TokenCategory::Erc20 },
        ];
        let d = diff(&entries, &tokens);
        assert_eq!(d.to_add, vec![entries[2]]);
        assert_eq!(d.to_enable, vec![addr(2)]);
        assert_eq!(d.to_disable, vec![addr(3)]);
        assert!(!d.is_empty());
    }
}
