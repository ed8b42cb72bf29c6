//! Registry persistence
//!
//! [`StateStore`] is the load/save contract for the token and pool caches
//! and the lookup-throttle history. Saves replace the stored set.
//!
//! Created: 2026-02-06

pub mod json_store;

pub use json_store::JsonStateStore;

use crate::throttle::ThrottleRecord;
use crate::types::{Pool, Token};
use anyhow::Result;

pub trait StateStore: Send + Sync {
    fn load_tokens(&self) -> Result<Vec<Token>>;
    fn save_tokens(&self, tokens: &[Token]) -> Result<()>;

    fn load_pools(&self) -> Result<Vec<Pool>>;
    fn save_pools(&self, pools: &[Pool]) -> Result<()>;

    fn load_throttle(&self) -> Result<Vec<ThrottleRecord>>;
    fn save_throttle(&self, records: &[ThrottleRecord]) -> Result<()>;
}
