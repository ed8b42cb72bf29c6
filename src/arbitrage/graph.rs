//! Price graph and bounded cycle search
//!
//! Nodes are token addresses. Every pool contributes two directed edges:
//! token0→token1 at the pool rate and token1→token0 at its reciprocal.
//! Parallel pools on the same pair give parallel edges.
//!
//! The DFS keeps a single path and an on-path set that are pushed/popped
//! with the recursion, so nothing is copied per step. Cycles are rotated
//! to start at their smallest token address before de-duplication; a
//! cycle found from every one of its nodes is reported once.
//!
//! Created: 2026-02-04

use crate::token::MarketView;
use crate::types::Pool;
use alloy::primitives::Address;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub to: Address,
    pub rate: f64,
    pub pool: Address,
}

/// A closed conversion path
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    /// Open path: hop `i` goes from `tokens[i]` to `tokens[(i + 1) % n]`
    pub tokens: Vec<Address>,
    /// `pools[i]` carries hop `i`
    pub pools: Vec<Address>,
    pub return_ratio: f64,
}

impl Cycle {
    fn rotate_to_index(&self, idx: usize) -> Cycle {
        let mut tokens = self.tokens.clone();
        let mut pools = self.pools.clone();
        tokens.rotate_left(idx);
        pools.rotate_left(idx);
        Cycle {
            tokens,
            pools,
            return_ratio: self.return_ratio,
        }
    }

    fn canonical(&self) -> Cycle {
        let idx = self
            .tokens
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| **t)
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.rotate_to_index(idx)
    }

    /// Same cycle starting at `token`, if it lies on it.
    pub fn starting_at(&self, token: Address) -> Option<Cycle> {
        let idx = self.tokens.iter().position(|t| *t == token)?;
        Some(self.rotate_to_index(idx))
    }

    pub fn contains(&self, token: Address) -> bool {
        self.tokens.contains(&token)
    }

    /// Token path with the start repeated at the end
    pub fn closed_path(&self) -> Vec<Address> {
        let mut path = self.tokens.clone();
        if let Some(first) = self.tokens.first() {
            path.push(*first);
        }
        path
    }

    pub fn hops(&self) -> usize {
        self.pools.len()
    }
}

#[derive(Debug, Default, Clone)]
pub struct PriceGraph {
    adjacency: HashMap<Address, Vec<Edge>>,
}

struct Search<'a> {
    graph: &'a PriceGraph,
    start: Address,
    max_len: usize,
    path: Vec<Address>,
    pools: Vec<Address>,
    on_path: HashSet<Address>,
    seen: HashSet<(Vec<Address>, Vec<Address>)>,
    found: Vec<Cycle>,
}

impl PriceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add both directions for a pool quoting `rate` token1 per token0.
    pub fn add_pool(&mut self, token0: Address, token1: Address, rate: f64, pool: Address) {
        if !(rate > 0.0 && rate.is_finite()) {
            return;
        }
        self.adjacency.entry(token0).or_default().push(Edge {
            to: token1,
            rate,
            pool,
        });
        self.adjacency.entry(token1).or_default().push(Edge {
            to: token0,
            rate: 1.0 / rate,
            pool,
        });
    }

    /// Graph over the given pools, skipping any without a usable price.
    pub fn from_pools(view: &MarketView, pools: &[&Pool]) -> Self {
        let mut graph = Self::new();
        for pool in pools {
            if let Some(rate) = view.price_token0_over_token1(pool) {
                graph.add_pool(pool.token0(), pool.token1(), rate, pool.address);
            }
        }
        graph
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|e| e.len()).sum()
    }

    /// Every distinct cycle of at most `max_len` hops with return ratio > 1.
    pub fn find_cycles(&self, max_len: usize) -> Vec<Cycle> {
        let mut nodes: Vec<Address> = self.adjacency.keys().copied().collect();
        nodes.sort();

        let mut search = Search {
            graph: self,
            start: Address::ZERO,
            max_len,
            path: Vec::with_capacity(max_len),
            pools: Vec::with_capacity(max_len),
            on_path: HashSet::new(),
            seen: HashSet::new(),
            found: Vec::new(),
        };

        for start in nodes {
            search.start = start;
            search.path.push(start);
            search.on_path.insert(start);
            search.extend(start, 1.0);
            search.on_path.remove(&start);
            search.path.pop();
        }
        search.found
    }
}

impl Search<'_> {
    fn extend(&mut self, current: Address, ratio: f64) {
        let Some(edges) = self.graph.adjacency.get(&current) else {
            return;
        };
        for edge in edges {
            if self.pools.last() == Some(&edge.pool) {
                continue;
            }
            let next_ratio = ratio * edge.rate;
            let hops = self.pools.len() + 1;

            if edge.to == self.start {
                if hops >= 2 && next_ratio > 1.0 {
                    self.pools.push(edge.pool);
                    self.record(next_ratio);
                    self.pools.pop();
                }
                continue;
            }
            if hops >= self.max_len || self.on_path.contains(&edge.to) {
                continue;
            }

            self.path.push(edge.to);
            self.pools.push(edge.pool);
            self.on_path.insert(edge.to);
            self.extend(edge.to, next_ratio);
            self.on_path.remove(&edge.to);
            self.pools.pop();
            self.path.pop();
        }
    }

    fn record(&mut self, ratio: f64) {
        let cycle = Cycle {
            tokens: self.path.clone(),
            pools: self.pools.clone(),
            return_ratio: ratio,
        }
        .canonical();
        if self.seen.insert((cycle.tokens.clone(), cycle.pools.clone())) {
            self.found.push(cycle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[test]
    fn test_triangle_found_once() {
        let (a, b, c) = (addr(1), addr(2), addr(3));
        let mut graph = PriceGraph::new();
        graph.add_pool(a, b, 2.0, addr(0x10));
        graph.add_pool(b, c, 2.0, addr(0x11));
        graph.add_pool(c, a, 0.3, addr(0x12));

        let cycles = graph.find_cycles(4);
        assert_eq!(cycles.len(), 1);
        assert!((cycles[0].return_ratio - 1.2).abs() < 1e-9);
        assert_eq!(cycles[0].tokens, vec![a, b, c]);
        assert_eq!(cycles[0].closed_path(), vec![a, b, c, a]);
        assert_eq!(cycles[0].hops(), 3);
    }

    #[test]
    fn test_no_cycle_when_product_not_above_one() {
        let (a, b, c) = (addr(1), addr(2), addr(3));
        let mut graph = PriceGraph::new();
        graph.add_pool(a, b, 2.0, addr(0x10));
        graph.add_pool(b, c, 2.0, addr(0x11));
        graph.add_pool(c, a, 0.25, addr(0x12));

        assert!(graph.find_cycles(4).is_empty());
    }

    #[test]
    fn test_max_len_bounds_search() {
        let (a, b, c) = (addr(1), addr(2), addr(3));
        let mut graph = PriceGraph::new();
        graph.add_pool(a, b, 2.0, addr(0x10));
        graph.add_pool(b, c, 2.0, addr(0x11));
        graph.add_pool(c, a, 0.3, addr(0x12));

        assert!(graph.find_cycles(2).is_empty());
        assert_eq!(graph.find_cycles(3).len(), 1);
    }

    #[test]
    fn test_parallel_pools_form_two_hop_cycle() {
        let (a, b) = (addr(1), addr(2));
        let mut graph = PriceGraph::new();
        graph.add_pool(a, b, 2.0, addr(0x10));
        graph.add_pool(a, b, 2.1, addr(0x11));

        let cycles = graph.find_cycles(4);
        assert_eq!(cycles.len(), 1);
        let cycle = &cycles[0];
        assert_eq!(cycle.pools, vec![addr(0x11), addr(0x10)]);
        assert!((cycle.return_ratio - 2.1 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_starting_at_rotates() {
        let (a, b, c) = (addr(1), addr(2), addr(3));
        let mut graph = PriceGraph::new();
        graph.add_pool(a, b, 2.0, addr(0x10));
        graph.add_pool(b, c, 2.0, addr(0x11));
        graph.add_pool(c, a, 0.3, addr(0x12));

        let cycle = graph.find_cycles(4).remove(0);
        let from_c = cycle.starting_at(c).unwrap();
        assert_eq!(from_c.tokens, vec![c, a, b]);
        assert_eq!(from_c.pools, vec![addr(0x12), addr(0x10), addr(0x11)]);
        assert!(cycle.starting_at(addr(9)).is_none());
        assert!(!graph.find_cycles(4).is_empty());
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 6);
    }

    #[test]
    fn test_invalid_rates_are_ignored() {
        let mut graph = PriceGraph::new();
        graph.add_pool(addr(1), addr(2), 0.0, addr(0x10));
        graph.add_pool(addr(1), addr(2), f64::INFINITY, addr(0x11));
        assert_eq!(graph.edge_count(), 0);
    }
}
