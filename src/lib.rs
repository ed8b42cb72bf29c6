//! DEX Arbitrage Monitor Library
//!
//! Keeps an in-memory mirror of ERC20 tokens and Uniswap V3 pools in sync
//! with the chain, searches the price graph for profitable cycles on every
//! swap, and tracks stablecoin pegs against an external USD feed.
//!
//! Created: 2026-02-03
//! Modified: 2026-02-06 - Coordinator, persistence, universe reload

pub mod arbitrage;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod coordinator;
pub mod error;
pub mod peg;
pub mod persistence;
pub mod pool;
pub mod throttle;
pub mod token;
pub mod types;
pub mod universe;

// Re-export commonly used types
pub use config::{load_config, MonitorConfig};
pub use coordinator::{Coordinator, UniverseReport};
pub use error::RegistryError;
pub use pool::PoolRegistry;
pub use token::TokenRegistry;
pub use types::{Opportunity, Pool, Token, TokenCategory};
