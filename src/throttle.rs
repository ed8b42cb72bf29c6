//! Request Throttle Cache: suppress repeated "does this pool exist" lookups
//!
//! Purpose:
//!     Factory lookups for pairs that have no pool at a given fee tier return
//!     the zero address and will almost always keep doing so. Recording every
//!     completed lookup lets discovery skip a (pair, fee) for a fixed window
//!     (30 days by default) instead of re-querying it on every universe load.
//!
//! Created: 2026-02-03
//!
//! Design:
//!     - Key: (lookup key, method); only the most recent call per key is kept
//!     - Fixed revisit window, no backoff
//!     - Records older than the window are pruned before persisting

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Throttled RPC method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    GetPool,
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcMethod::GetPool => write!(f, "getPool"),
        }
    }
}

impl FromStr for RpcMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "getPool" => Ok(RpcMethod::GetPool),
            other => Err(format!("unknown rpc method '{}'", other)),
        }
    }
}

/// A completed lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleRecord {
    pub key: String,
    pub method: RpcMethod,
    pub called_at: DateTime<Utc>,
}

/// Shared, cloneable lookup history
#[derive(Debug, Clone)]
pub struct RequestThrottleCache {
    records: Arc<DashMap<(String, RpcMethod), DateTime<Utc>>>,
    retry_window: Duration,
}

impl RequestThrottleCache {
    pub fn new(retry_window: Duration) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            retry_window,
        }
    }

    pub fn retry_window(&self) -> Duration {
        self.retry_window
    }

    /// Record a call made now.
    pub fn add(&self, key: &str, method: RpcMethod) {
        self.add_at(key, method, Utc::now());
    }

    pub fn add_at(&self, key: &str, method: RpcMethod, at: DateTime<Utc>) {
        debug!("Throttle: recorded {} {}", method, key);
        self.records
            .entry((key.to_string(), method))
            .and_modify(|t| {
                if at > *t {
                    *t = at;
                }
            })
            .or_insert(at);
    }

    /// True if the last recorded call for (key, method) happened after `t`.
    pub fn has_been_called_after(&self, key: &str, method: RpcMethod, t: DateTime<Utc>) -> bool {
        self.records
            .get(&(key.to_string(), method))
            .map(|last| *last > t)
            .unwrap_or(false)
    }

    /// True if the lookup ran within the retry window ending at `now`.
    pub fn is_throttled(&self, key: &str, method: RpcMethod, now: DateTime<Utc>) -> bool {
        self.has_been_called_after(key, method, now - self.retry_window)
    }

    /// Drop records that no longer throttle anything. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retry_window;
        let before = self.records.len();
        self.records.retain(|_, t| *t > cutoff);
        before - self.records.len()
    }

    pub fn records(&self) -> Vec<ThrottleRecord> {
        let mut out: Vec<ThrottleRecord> = self
            .records
            .iter()
            .map(|e| ThrottleRecord {
                key: e.key().0.clone(),
                method: e.key().1,
                called_at: *e.value(),
            })
            .collect();
        out.sort_by(|a, b| b.called_at.cmp(&a.called_at));
        out
    }

    pub fn load(&self, records: Vec<ThrottleRecord>) {
        for r in records {
            self.add_at(&r.key, r.method, r.called_at);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> RequestThrottleCache {
        RequestThrottleCache::new(Duration::days(30))
    }

    #[test]
    fn test_called_after_window() {
        let cache = cache();
        let inserted = Utc::now();
        cache.add_at("A-B-500", RpcMethod::GetPool, inserted);

        assert!(cache.has_been_called_after("A-B-500", RpcMethod::GetPool, inserted - Duration::seconds(1)));
        assert!(!cache.has_been_called_after(
            "A-B-500",
            RpcMethod::GetPool,
            inserted + cache.retry_window() + Duration::seconds(1)
        ));
        assert!(!cache.has_been_called_after("A-B-3000", RpcMethod::GetPool, inserted - Duration::days(1)));
    }

    #[test]
    fn test_is_throttled_within_window() {
        let cache = cache();
        let now = Utc::now();
        cache.add_at("A-B-100", RpcMethod::GetPool, now - Duration::days(29));
        cache.add_at("A-B-500", RpcMethod::GetPool, now - Duration::days(31));

        assert!(cache.is_throttled("A-B-100", RpcMethod::GetPool, now));
        assert!(!cache.is_throttled("A-B-500", RpcMethod::GetPool, now));
    }

    #[test]
    fn test_keeps_latest_call_and_prunes() {
        let cache = cache();
        let now = Utc::now();
        cache.add_at("k", RpcMethod::GetPool, now - Duration::days(40));
        cache.add_at("k", RpcMethod::GetPool, now - Duration::days(1));
        cache.add_at("k", RpcMethod::GetPool, now - Duration::days(50));
        cache.add_at("old", RpcMethod::GetPool, now - Duration::days(40));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.records()[0].called_at, now - Duration::days(1));

        assert_eq!(cache.prune(now), 1);
        assert!(cache.is_throttled("k", RpcMethod::GetPool, now));
        assert_eq!("getPool".parse::<RpcMethod>(), Ok(RpcMethod::GetPool));
    }
}
