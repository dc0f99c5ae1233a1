//! A shared logical clock.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Cloneable handle to the current epoch.
///
/// Every shareholder holds a clone of the same clock, so advancing it anywhere moves every
/// shareholder into the next epoch at once.
#[derive(Clone, Debug, Default)]
pub struct Clock {
    epoch: Arc<AtomicU64>,
}

impl Clock {
    /// Creates a clock starting at epoch 0.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Moves to the next epoch, returning it.
    pub fn advance(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;

    #[test_traced]
    fn test_shared() {
        let clock = Clock::new();
        let other = clock.clone();
        assert_eq!(clock.epoch(), 0);
        assert_eq!(other.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(other.epoch(), 2);
    }
}
