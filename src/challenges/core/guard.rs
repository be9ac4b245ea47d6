//! At-most-one-in-flight guard for gateway calls.
//!
//! The guard is checked and armed while the widget state lock is held, then the
//! lock is released for the network await. A second caller arriving in between
//! observes the armed guard and backs off; it never queues behind the first.

/// Tracks the single outstanding request for one operation slot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InFlight {
    key: Option<String>,
}

impl InFlight {
    pub fn new() -> Self {
        Self { key: None }
    }

    /// Arm the guard for `key`. Returns `false` when any request is already
    /// outstanding.
    pub fn try_begin(&mut self, key: impl Into<String>) -> bool {
        if self.key.is_some() {
            return false;
        }
        self.key = Some(key.into());
        true
    }

    pub fn is_busy(&self) -> bool {
        self.key.is_some()
    }

    pub fn current(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Disarm the guard if it is still held for `key`.
    ///
    /// A stale completion (the slot was reset and re-armed for another key in
    /// the meantime) leaves the newer request untouched.
    pub fn finish(&mut self, key: &str) -> bool {
        if self.key.as_deref() == Some(key) {
            self.key = None;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.key = None;
    }
}
