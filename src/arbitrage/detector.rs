//! Arbitrage Opportunity Detector
//!
//! Runs once per swap-driven price change. The search is limited to the
//! pools reachable from the changed pool's tokens, and the graph is built
//! from a [`MarketView`] so no registry lock is held during the search.
//!
//! Profit is `(return_ratio - 1) × USD value of the base token`, with no
//! fee, slippage or gas model. This is an alerting heuristic only.
//!
//! Created: 2026-02-04
//! Modified: 2026-02-05 - Safety gate check before emission

use super::graph::PriceGraph;
use super::recorder::OpportunitySink;
use crate::peg::SystemGate;
use crate::pool::{PoolRegistry, PriceChange};
use crate::token::MarketView;
use crate::types::{Opportunity, OpportunityRecord};
use alloy::primitives::Address;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Log detection statistics every N runs
const STATS_LOG_EVERY: u64 = 20;

#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub min_profit_usd: f64,
    pub max_cycle_len: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_profit_usd: 5.0,
            max_cycle_len: 4,
        }
    }
}

#[derive(Debug, Default)]
struct DetectionStats {
    runs: AtomicU64,
    with_opportunity: AtomicU64,
}

pub struct ArbitrageDetector {
    pools: PoolRegistry,
    config: DetectorConfig,
    gate: SystemGate,
    sink: Arc<dyn OpportunitySink>,
    stats: DetectionStats,
}

impl ArbitrageDetector {
    pub fn new(pools: PoolRegistry, config: DetectorConfig, gate: SystemGate, sink: Arc<dyn OpportunitySink>) -> Self {
        Self {
            pools,
            config,
            gate,
            sink,
            stats: DetectionStats::default(),
        }
    }

    /// Qualifying opportunities around `changed_pool` in a given view.
    ///
    /// Both non-stable tokens of the pool are tried as base, token0 first.
    /// A cycle is reported once, credited to the first base whose USD
    /// profit clears the floor.
    pub fn detect(&self, view: &MarketView, changed_pool: Address) -> Vec<Opportunity> {
        let Some(pool) = view.pool(changed_pool) else {
            return Vec::new();
        };
        if !view.is_tradable(pool) {
            return Vec::new();
        }

        let mut seen: HashSet<Vec<Address>> = HashSet::new();
        let mut out = Vec::new();

        for base in [pool.token0(), pool.token1()] {
            let Some(token) = view.token(base) else { continue };
            if token.category.is_stable() {
                continue;
            }
            let Some(usd) = view.estimate_usd_value(base) else {
                debug!("Skipping {}: no USD estimate", token.symbol);
                continue;
            };

            let subgraph = view.reachable_pools(base);
            let graph = PriceGraph::from_pools(view, &subgraph);
            for cycle in graph.find_cycles(self.config.max_cycle_len) {
                let profit = (cycle.return_ratio - 1.0) * usd;
                if profit < self.config.min_profit_usd {
                    continue;
                }
                if !seen.insert(cycle.pools.clone()) {
                    continue;
                }
                let cycle = cycle.starting_at(base).unwrap_or(cycle);
                out.push(Opportunity {
                    path: cycle.closed_path(),
                    pools: cycle.pools,
                    return_ratio: cycle.return_ratio,
                    base_token: base,
                    profit_usd: profit,
                });
            }
        }
        out
    }

    /// Detect around a changed pool and emit what qualifies.
    ///
    /// Returns the emitted opportunities; nothing is emitted while the
    /// system gate is closed.
    pub fn on_price_change(&self, change: PriceChange) -> Vec<Opportunity> {
        let view = self.pools.market_view();
        let opportunities = self.detect(&view, change.pool);
        self.track(!opportunities.is_empty());

        if opportunities.is_empty() {
            return opportunities;
        }
        if !self.gate.is_active() {
            warn!(
                "Suppressed {} opportunities on {:?}: system inactive",
                opportunities.len(),
                change.pool
            );
            return Vec::new();
        }

        let pool_key = view
            .pool(change.pool)
            .map(|p| view.pool_key(p))
            .unwrap_or_else(|| format!("{:?}", change.pool));

        for opp in &opportunities {
            let symbols: Vec<String> = opp.path.iter().map(|a| view.symbol(*a)).collect();
            info!(
                "🎯 OPPORTUNITY: {} | ratio {:.5} | est. profit ${:.2} | trigger {}",
                symbols.join(" → "),
                opp.return_ratio,
                opp.profit_usd,
                pool_key
            );

            let record = OpportunityRecord {
                detected_at: change.at,
                pool: format!("{:?}", change.pool),
                pool_key: pool_key.clone(),
                base_token: format!("{:?}", opp.base_token),
                base_symbol: view.symbol(opp.base_token),
                path: opp.path.iter().map(|a| format!("{:?}", a)).collect(),
                path_symbols: symbols,
                pools: opp.pools.iter().map(|a| format!("{:?}", a)).collect(),
                return_ratio: opp.return_ratio,
                profit_usd: opp.profit_usd,
            };
            if let Err(e) = self.sink.record(&record) {
                error!("Failed to write opportunity record: {:#}", e);
            }
        }
        opportunities
    }

    fn track(&self, found: bool) {
        let runs = self.stats.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let hits = if found {
            self.stats.with_opportunity.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.stats.with_opportunity.load(Ordering::Relaxed)
        };
        if runs % STATS_LOG_EVERY == 0 {
            info!(
                "📊 Detection: {} runs, {} with opportunities ({:.1}%)",
                runs,
                hits,
                hits as f64 * 100.0 / runs as f64
            );
        }
    }

    pub fn runs(&self) -> u64 {
        self.stats.runs.load(Ordering::Relaxed)
    }

    /// Consume price changes until the channel closes.
    pub async fn run(self: Arc<Self>, mut changes: mpsc::Receiver<PriceChange>) {
        info!("Detector started");
        while let Some(change) = changes.recv().await {
            self.on_price_change(change);
        }
        info!("Detector stopped: price channel closed");
    }
}
