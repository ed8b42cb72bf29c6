//! Pool registry and V3 price math
//!
//! Created: 2026-02-03

pub mod price;
pub mod registry;

pub use registry::{PoolFetch, PoolRegistry, PriceChange};
