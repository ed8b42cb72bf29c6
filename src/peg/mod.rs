//! Stablecoin peg monitoring
//!
//! Created: 2026-02-05

pub mod controller;
pub mod feed;
pub mod gate;
pub mod history;
pub mod liveness;

pub use controller::{PegConfig, PegController};
pub use feed::{CoinbaseTickerFeed, PriceFeed, TickerUpdate};
pub use gate::SystemGate;
pub use history::{PoolPriceHistory, PriceHistory, PricePoint};
pub use liveness::{LivenessPolicy, LivenessVerdict};
