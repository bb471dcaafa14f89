//! Spin-wait on a shared memory word

use std::sync::atomic::{AtomicU32, Ordering};

/// Busy-wait loop with an optional spin budget
///
/// There is no kernel-mediated signal between the primary and its
/// secondaries, only a polled word, so waiting means spinning.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinWait {
    limit: Option<u64>,
}

impl SpinWait {
    /// Spin until the condition holds, however long it takes
    pub fn unbounded() -> Self {
        Self { limit: None }
    }

    /// Give up after `spins` failed checks
    pub fn with_limit(spins: u64) -> Self {
        Self { limit: Some(spins) }
    }

    /// Spin until `cond` returns true
    ///
    /// Returns the number of pause hints issued, or `None` once the budget is
    /// exhausted.
    pub fn until(&self, mut cond: impl FnMut() -> bool) -> Option<u64> {
        let mut spins = 0u64;
        while !cond() {
            if self.limit.map_or(false, |limit| spins >= limit) {
                return None;
            }
            std::hint::spin_loop();
            spins = spins.wrapping_add(1);
        }
        Some(spins)
    }

    /// Spin until `word` holds `expected`, loading with acquire ordering
    pub fn until_eq(&self, word: &AtomicU32, expected: u32) -> Option<u64> {
        self.until(|| word.load(Ordering::Acquire) == expected)
    }
}
