//! Session-index allocation (§4.4): picking the locally-unique 32-bit index a peer uses as the
//! `receiver` field on every handshake and data message they send us.
use rand_core::RngCore;

/// Tracks the set of session indices currently in use so a freshly generated one can be checked
/// for collisions before being handed out.
#[derive(Default)]
pub struct IndexAllocator {
    used: ahash::AHashSet<u32>,
}

impl IndexAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws random indices until one is free, reserves it, and returns it. The wire format puts
    /// no structure on session indices, so any non-conflicting `u32` is valid.
    pub fn allocate(&mut self, rng: &mut impl RngCore) -> u32 {
        loop {
            let candidate = rng.next_u32();
            if self.used.insert(candidate) {
                return candidate;
            }
        }
    }

    pub fn free(&mut self, index: u32) {
        self.used.remove(&index);
    }

    pub fn contains(&self, index: u32) -> bool {
        self.used.contains(&index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn allocated_indices_are_unique_until_freed() {
        let mut a = IndexAllocator::new();
        let first = a.allocate(&mut OsRng);
        assert!(a.contains(first));
        a.free(first);
        assert!(!a.contains(first));
    }

    #[test]
    fn many_allocations_stay_distinct() {
        let mut a = IndexAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let idx = a.allocate(&mut OsRng);
            assert!(seen.insert(idx));
        }
    }
}
