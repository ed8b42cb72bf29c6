//! Arbitrage cycle detection
//!
//! Created: 2026-02-04

pub mod detector;
pub mod graph;
pub mod recorder;

pub use detector::{ArbitrageDetector, DetectorConfig};
pub use graph::{Cycle, PriceGraph};
pub use recorder::{JsonOpportunityRecorder, OpportunitySink};
