//! System-active safety gate
//!
//! Process-wide flag cleared while a monitored stablecoin is off its peg.
//! Opportunity emission and USD-valued sweeps check it before acting.
//!
//! Created: 2026-02-05

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SystemGate {
    active: Arc<AtomicBool>,
}

impl SystemGate {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Clear the flag. Returns true on the active → inactive transition.
    pub fn trip(&self, reason: &str) -> bool {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        if was_active {
            warn!("🚨 System deactivated: {}", reason);
        }
        was_active
    }

    /// Set the flag. Returns true on the inactive → active transition.
    pub fn restore(&self) -> bool {
        let was_active = self.active.swap(true, Ordering::SeqCst);
        if !was_active {
            info!("✅ System reactivated: all monitored stables back within bounds");
        }
        !was_active
    }
}

impl Default for SystemGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_reported_once() {
        let gate = SystemGate::new();
        let shared = gate.clone();
        assert!(gate.is_active());

        assert!(gate.trip("USDT at 0.95"));
        assert!(!gate.trip("USDT at 0.94"));
        assert!(!shared.is_active());

        assert!(shared.restore());
        assert!(!shared.restore());
        assert!(gate.is_active());
    }
}
