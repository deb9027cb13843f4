//! Shared, lock-free running bound on observed particle speed.
//!
//! The bound decays by [`DECAY`] at the start of every tick and is pushed
//! back up by workers that observed a faster particle. Updates are a
//! compare-and-swap loop on the `f32` bit pattern, so parallel workers never
//! take a lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// Per-tick decay factor.
pub const DECAY: f32 = 0.75;

#[derive(Debug)]
pub struct SpeedBound {
    bits: AtomicU32,
}

impl SpeedBound {
    pub fn new(initial: f32) -> Self {
        Self {
            bits: AtomicU32::new(initial.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    /// `bound = max(bound * DECAY, floor)`. Returns the new bound.
    pub fn decay(&self, floor: f32) -> f32 {
        let value = (self.get() * DECAY).max(floor);
        self.set(value);
        value
    }

    /// Raise the bound to `candidate` if it is larger.
    ///
    /// Retries until the swap succeeds or the shared value is already at
    /// least `candidate`. NaN is never stored. Returns whether the bound
    /// changed.
    pub fn propose(&self, candidate: f32) -> bool {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            if candidate.is_nan() || candidate <= f32::from_bits(current) {
                return false;
            }
            match self.bits.compare_exchange_weak(
                current,
                candidate.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for SpeedBound {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_decay_without_peaks() {
        let bound = SpeedBound::new(64.0);
        for _ in 0..3 {
            bound.decay(0.01);
        }
        assert!((bound.get() - 64.0 * 0.75f32.powi(3)).abs() < 1e-4);
    }

    #[test]
    fn test_decay_floors() {
        let bound = SpeedBound::new(1.0);
        for _ in 0..50 {
            bound.decay(0.25);
        }
        assert_eq!(bound.get(), 0.25);
    }

    #[test]
    fn test_propose_only_raises() {
        let bound = SpeedBound::new(2.0);
        assert!(!bound.propose(1.0));
        assert!(bound.propose(3.0));
        assert!(!bound.propose(f32::NAN));
        assert_eq!(bound.get(), 3.0);
    }

    #[test]
    fn test_concurrent_proposals_keep_maximum() {
        let bound = SpeedBound::new(0.0);
        (0..1000).into_par_iter().for_each(|i| {
            bound.propose(i as f32);
        });
        assert_eq!(bound.get(), 999.0);
    }
}
