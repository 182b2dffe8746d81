//! Shared gating state for scheduled and page-triggered syncs.

use std::sync::atomic::{AtomicBool, Ordering};

/// Rate-limit flag shared by the scheduler, page sync, and mutations.
///
/// While set, all scheduled and page-triggered syncs are refused before
/// any remote call is made. Set when the provider returns a rate-limit
/// response; cleared by the caller once the retry window has passed.
#[derive(Debug, Default)]
pub struct RateLimitGate {
    limited: AtomicBool,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.limited.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.limited.store(false, Ordering::SeqCst);
    }

    pub fn is_limited(&self) -> bool {
        self.limited.load(Ordering::SeqCst)
    }
}

/// Application visibility flag.
///
/// The scheduler polls only while the application is visible; a hidden
/// window suspends polling until the next tick after it becomes visible
/// again.
#[derive(Debug)]
pub struct VisibilityGate {
    visible: AtomicBool,
}

impl Default for VisibilityGate {
    fn default() -> Self {
        Self {
            visible: AtomicBool::new(true),
        }
    }
}

impl VisibilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_defaults() {
        assert!(!RateLimitGate::new().is_limited());
        assert!(VisibilityGate::new().is_visible());
    }

    #[test]
    fn gate_transitions() {
        let gate = RateLimitGate::new();
        gate.set();
        assert!(gate.is_limited());
        gate.clear();
        assert!(!gate.is_limited());
    }
}
