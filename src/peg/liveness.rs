//! Feed liveness policy
//!
//! Silence above `restart_after` restarts the feed, unless the last restart
//! happened less than `warn_ceiling` ago; in that band the supervisor only
//! warns, so a feed that is slow to come back is not torn down repeatedly.
//!
//! Created: 2026-02-05

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessVerdict {
    Healthy,
    /// Silent too long, but a restart is already recent
    Degraded { silence: Duration },
    Restart { silence: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct LivenessPolicy {
    pub restart_after: Duration,
    pub warn_ceiling: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            restart_after: Duration::from_secs(90),
            warn_ceiling: Duration::from_secs(120),
        }
    }
}

impl LivenessPolicy {
    pub fn evaluate(&self, silence: Duration, since_last_restart: Option<Duration>) -> LivenessVerdict {
        if silence <= self.restart_after {
            return LivenessVerdict::Healthy;
        }
        match since_last_restart {
            Some(elapsed) if elapsed < self.warn_ceiling => LivenessVerdict::Degraded { silence },
            _ => LivenessVerdict::Restart { silence },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_quiet_feed_is_healthy() {
        let policy = LivenessPolicy::default();
        assert_eq!(policy.evaluate(secs(30), None), LivenessVerdict::Healthy);
        assert_eq!(policy.evaluate(secs(90), Some(secs(5))), LivenessVerdict::Healthy);
    }

    #[test]
    fn test_restart_after_silence() {
        let policy = LivenessPolicy::default();
        assert_eq!(
            policy.evaluate(secs(91), None),
            LivenessVerdict::Restart { silence: secs(91) }
        );
        assert_eq!(
            policy.evaluate(secs(200), Some(secs(600))),
            LivenessVerdict::Restart { silence: secs(200) }
        );
    }

    #[test]
    fn test_recent_restart_only_warns() {
        let policy = LivenessPolicy::default();
        assert_eq!(
            policy.evaluate(secs(100), Some(secs(65))),
            LivenessVerdict::Degraded { silence: secs(100) }
        );
        assert_eq!(
            policy.evaluate(secs(100), Some(secs(120))),
            LivenessVerdict::Restart { silence: secs(100) }
        );
    }
}
