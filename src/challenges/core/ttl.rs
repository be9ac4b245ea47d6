//! Time-to-live countdown bound to each issued challenge.
//!
//! The countdown is advanced by whole-second ticks from the widget's timer task
//! (or manually by callers driving the widget themselves), so expiry is fully
//! deterministic under test.

use std::time::Duration;

/// Result of advancing a countdown by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    Running { remaining_secs: u64 },
    /// Emitted exactly once, on the tick that reaches zero.
    Expired,
    /// Already expired before this tick.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeTtl {
    total_secs: u64,
    remaining_secs: u64,
}

impl ChallengeTtl {
    /// Sub-second remainders round up so a non-zero TTL always survives one tick.
    pub fn new(ttl: Duration) -> Self {
        let mut secs = ttl.as_secs();
        if ttl.subsec_nanos() > 0 {
            secs += 1;
        }
        Self {
            total_secs: secs,
            remaining_secs: secs,
        }
    }

    pub fn total(&self) -> Duration {
        Duration::from_secs(self.total_secs)
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_secs(self.remaining_secs)
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_secs == 0
    }

    pub fn tick(&mut self) -> TtlStatus {
        if self.remaining_secs == 0 {
            return TtlStatus::Stale;
        }
        self.remaining_secs -= 1;
        if self.remaining_secs == 0 {
            TtlStatus::Expired
        } else {
            TtlStatus::Running {
                remaining_secs: self.remaining_secs,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_once_after_full_countdown() {
        let mut ttl = ChallengeTtl::new(Duration::from_secs(3));
        assert_eq!(ttl.tick(), TtlStatus::Running { remaining_secs: 2 });
        assert_eq!(ttl.tick(), TtlStatus::Running { remaining_secs: 1 });
        assert_eq!(ttl.tick(), TtlStatus::Expired);
        assert!(ttl.is_expired());
        assert_eq!(ttl.tick(), TtlStatus::Stale);
    }

    #[test]
    fn fractional_ttl_rounds_up() {
        let ttl = ChallengeTtl::new(Duration::from_millis(1500));
        assert_eq!(ttl.remaining(), Duration::from_secs(2));
        assert!(ChallengeTtl::new(Duration::ZERO).is_expired());
    }
}
