//! Liquidity floor sweep
//!
//! Disables pools whose USD value (reserve × USD price, summed per side)
//! is under the floor. When only one side resolves a USD price the floor
//! is scaled down; a pool with no priced side values at zero.
//!
//! Created: 2026-02-06

use crate::peg::SystemGate;
use crate::pool::PoolRegistry;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct LiquidityFloor {
    pub min_usd: f64,
    /// Floor multiplier when a single side is priced
    pub one_sided_factor: f64,
}

impl Default for LiquidityFloor {
    fn default() -> Self {
        Self {
            min_usd: 70_000.0,
            one_sided_factor: 0.45,
        }
    }
}

impl LiquidityFloor {
    pub fn threshold(&self, priced_sides: u8) -> f64 {
        if priced_sides >= 2 {
            self.min_usd
        } else {
            self.min_usd * self.one_sided_factor
        }
    }
}

/// Disable every active pool under the floor. Skipped while the gate is
/// closed, since USD valuations are not trusted then. Returns the number
/// of pools disabled.
pub async fn sweep_low_liquidity(pools: &PoolRegistry, gate: &SystemGate, floor: LiquidityFloor) -> usize {
    if !gate.is_active() {
        info!("Liquidity sweep skipped: system inactive");
        return 0;
    }

    let view = pools.market_view();
    let mut low = Vec::new();
    for pool in view.pools().iter().filter(|p| p.is_active()) {
        let value = view.pool_usd_value(pool);
        if value.priced_sides == 0 {
            warn!("Pool {} has no token value in USD", view.pool_key(pool));
        }
        if value.usd < floor.threshold(value.priced_sides) {
            low.push((pool.address, view.pool_key(pool), value.usd));
        }
    }

    let mut disabled = Vec::new();
    for (address, key, usd) in low {
        match pools.disable(address).await {
            Ok(true) => disabled.push(format!("{} (${:.0})", key, usd)),
            Ok(false) => {}
            Err(e) => warn!("Failed to disable low-liquidity pool {}: {}", key, e),
        }
    }

    if !disabled.is_empty() {
        info!("💧 Disabled {} low-liquidity pools: {}", disabled.len(), disabled.join(", "));
    }
    disabled.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_scales_for_one_side() {
        let floor = LiquidityFloor::default();
        assert_eq!(floor.threshold(2), 70_000.0);
        assert!((floor.threshold(1) - 31_500.0).abs() < 1e-9);
        assert!((floor.threshold(0) - 31_500.0).abs() < 1e-9);
    }
}
