// # Epoch Tracker
//
// Exposes the single monotone watermark the sweeper reads each cycle: the
// minimum revision number still referenced by any active transaction. Frames
// at or above the watermark belong to revisions a reader may still visit and
// must not be evicted by a scoped sweeper.

use dashmap::DashMap;

use crate::common::{Revision, TransactionId};

/// Source of the minimum-active-revision watermark.
pub trait EpochTracker: Send + Sync {
    /// The smallest revision any active transaction still references, or
    /// `Revision::MAX` when no transaction is active.
    fn minimum_active_revision(&self) -> Revision;
}

/// Default epoch tracker: a registry of active transactions and the revision
/// each of them reads.
pub struct TransactionRegistry {
    active: DashMap<TransactionId, Revision>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
        }
    }

    pub fn register(&self, transaction: TransactionId, revision: Revision) {
        self.active.insert(transaction, revision);
    }

    pub fn unregister(&self, transaction: TransactionId) {
        self.active.remove(&transaction);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EpochTracker for TransactionRegistry {
    fn minimum_active_revision(&self) -> Revision {
        self.active
            .iter()
            .map(|entry| *entry.value())
            .min()
            .unwrap_or(Revision::MAX)
    }
}
