//! Deduplicator
//!
//! The single gate that decides whether an incoming order event is new.
//! Regardless of whether socket, push, and poll all report the same order,
//! only the first admission proceeds; later sightings are rejected.
//!
//! The notified set grows monotonically during a session and is bounded:
//! beyond capacity the oldest-inserted ids are evicted first, but an id
//! with an active unacknowledged alert session is never evicted. Admitted
//! ids are protected until `release` is called on session destruction;
//! release does NOT remove the id from the set, so a lagging channel
//! cannot re-alert a handled order.

use std::collections::{HashSet, VecDeque};

use crate::domain::order::OrderId;

/// Default bound on the notified set.
pub const DEFAULT_CAPACITY: usize = 500;

/// Canonical set of "already alerted" order ids.
#[derive(Debug)]
pub struct Deduplicator {
    /// Ids in insertion order, oldest at the front.
    insertion_order: VecDeque<OrderId>,
    /// Membership index over `insertion_order`.
    notified: HashSet<OrderId>,
    /// Ids with an active unacknowledged session; exempt from eviction.
    protected: HashSet<OrderId>,
    capacity: usize,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Deduplicator {
    /// Create a deduplicator bounded at `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            insertion_order: VecDeque::with_capacity(capacity.min(1024)),
            notified: HashSet::with_capacity(capacity.min(1024)),
            protected: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Admit an order id as newly seen.
    ///
    /// Returns `true` exactly once per id: the first caller wins and must
    /// create the alert session; every later caller gets `false`.
    pub fn admit(&mut self, order_id: OrderId) -> bool {
        if self.notified.contains(&order_id) {
            return false;
        }

        self.notified.insert(order_id);
        self.insertion_order.push_back(order_id);
        self.protected.insert(order_id);
        self.evict_excess();
        true
    }

    /// Check membership without admitting.
    #[must_use]
    pub fn contains(&self, order_id: OrderId) -> bool {
        self.notified.contains(&order_id)
    }

    /// Release an id after its alert session is destroyed.
    ///
    /// The id stays in the notified set (re-deliveries keep being
    /// rejected); it merely becomes eligible for eviction.
    pub fn release(&mut self, order_id: OrderId) {
        self.protected.remove(&order_id);
    }

    /// Number of ids currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notified.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notified.is_empty()
    }

    /// Forget everything. Used on logout/reset.
    pub fn clear(&mut self) {
        self.insertion_order.clear();
        self.notified.clear();
        self.protected.clear();
    }

    /// Evict oldest-inserted unprotected ids while over capacity.
    fn evict_excess(&mut self) {
        while self.notified.len() > self.capacity {
            let Some(pos) = self
                .insertion_order
                .iter()
                .position(|id| !self.protected.contains(id))
            else {
                // Every id is protected by an active session; the bound is
                // allowed to overshoot until sessions wind down.
                return;
            };

            if let Some(evicted) = self.insertion_order.remove(pos) {
                self.notified.remove(&evicted);
                tracing::trace!(order_id = evicted, "Evicted order id from notified set");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_admission_wins() {
        let mut dedup = Deduplicator::new(10);
        assert!(dedup.admit(501));
        assert!(!dedup.admit(501));
        assert!(!dedup.admit(501));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn release_does_not_reopen_admission() {
        let mut dedup = Deduplicator::new(10);
        assert!(dedup.admit(501));
        dedup.release(501);

        // A lagging channel re-delivers after acknowledgment.
        assert!(!dedup.admit(501));
        assert!(dedup.contains(501));
    }

    #[test]
    fn evicts_oldest_first() {
        let mut dedup = Deduplicator::new(3);
        for id in 1..=3 {
            assert!(dedup.admit(id));
            dedup.release(id);
        }

        assert!(dedup.admit(4));
        dedup.release(4);

        assert!(!dedup.contains(1), "oldest id should be evicted");
        assert!(dedup.contains(2));
        assert!(dedup.contains(3));
        assert!(dedup.contains(4));
    }

    #[test]
    fn protected_ids_survive_eviction() {
        let mut dedup = Deduplicator::new(2);
        assert!(dedup.admit(1)); // active session, never released
        assert!(dedup.admit(2));
        dedup.release(2);
        assert!(dedup.admit(3));
        dedup.release(3);

        // Capacity 2, three ids inserted: id 2 (oldest unprotected) goes.
        assert!(dedup.contains(1));
        assert!(!dedup.contains(2));
        assert!(dedup.contains(3));
    }

    #[test]
    fn all_protected_overshoots_bound() {
        let mut dedup = Deduplicator::new(2);
        for id in 1..=4 {
            assert!(dedup.admit(id));
        }
        // Nothing released, nothing evictable.
        assert_eq!(dedup.len(), 4);
        for id in 1..=4 {
            assert!(dedup.contains(id));
        }
    }

    #[test]
    fn clear_resets_everything() {
        let mut dedup = Deduplicator::new(10);
        assert!(dedup.admit(1));
        assert!(dedup.admit(2));
        dedup.clear();

        assert!(dedup.is_empty());
        // Post-reset the same ids are new again (fresh session).
        assert!(dedup.admit(1));
    }
}
