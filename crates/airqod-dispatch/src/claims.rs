//! In-flight claim tracking.
//!
//! The producer claims a record before queueing it and consumers release
//! the claim after processing, so a record is never handed to two workers
//! at once even when the producer rescans while work is still queued.

use std::{
    collections::HashSet,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard},
};

/// Shared set of claimed keys.
///
/// Cloning is cheap; clones share the same underlying set. The lock is a
/// plain `std` mutex and is never held across an await point.
#[derive(Debug, Clone, Default)]
pub struct ClaimSet<K: Eq + Hash> {
    inner: Arc<Mutex<HashSet<K>>>,
}

impl<K: Eq + Hash> ClaimSet<K> {
    /// Creates an empty claim set.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashSet::new())) }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<K>> {
        // A poisoned lock only means a holder panicked between two pure
        // set operations; the set itself is still consistent.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Claims a key. Returns false when it is already claimed.
    pub fn try_claim(&self, key: K) -> bool {
        self.lock().insert(key)
    }

    /// Releases a key. Returns false when it was not claimed.
    pub fn release(&self, key: &K) -> bool {
        self.lock().remove(key)
    }

    /// Whether the key is currently claimed.
    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    /// Number of currently claimed keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no keys are claimed.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use airqod_core::RecordId;

    use super::*;

    #[test]
    fn claim_is_exclusive_until_released() {
        let claims = ClaimSet::new();
        let id = RecordId::new();

        assert!(claims.try_claim(id));
        assert!(!claims.try_claim(id));
        assert!(claims.contains(&id));

        assert!(claims.release(&id));
        assert!(!claims.release(&id));
        assert!(claims.try_claim(id));
    }

    #[test]
    fn clones_share_state() {
        let claims = ClaimSet::new();
        let other = claims.clone();
        let id = RecordId::new();

        assert!(claims.try_claim(id));
        assert!(!other.try_claim(id));
        assert!(other.release(&id));
        assert!(claims.is_empty());
    }

    #[test]
    fn concurrent_claimers_admit_exactly_one() {
        let claims = ClaimSet::new();
        let id = RecordId::new();

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let claims = claims.clone();
                    scope.spawn(move || usize::from(claims.try_claim(id)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(winners, 1);
        assert_eq!(claims.len(), 1);
    }
}
