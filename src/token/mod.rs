//! Token registry and valuation
//!
//! Created: 2026-02-03

pub mod registry;
pub mod valuation;

pub use registry::TokenRegistry;
pub use valuation::{MarketView, PoolUsdValue};
