// # Transaction Intent Log
//
// Per-transaction append-only list of modified page containers. Logging a
// reference "steals" the page from the caches: the record, fragment and
// generic caches drop their mappings, the reference is reset to the null
// sentinel and stamped with its log index, and from then on closing the
// frames is unambiguously the log's responsibility (at commit or abort).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::frame_cache::RecordPageCache;
use crate::cache::tiers::GenericPageCache;
use crate::cache::Cache;
use crate::page::container::PageContainer;
use crate::page::reference::PageReference;

pub struct TransactionIntentLog {
    record_cache: Arc<RecordPageCache>,
    fragment_cache: Arc<RecordPageCache>,
    generic_cache: Arc<GenericPageCache>,
    entries: Mutex<Vec<PageContainer>>,
}

impl TransactionIntentLog {
    pub fn new(
        record_cache: Arc<RecordPageCache>,
        fragment_cache: Arc<RecordPageCache>,
        generic_cache: Arc<GenericPageCache>,
    ) -> Self {
        Self {
            record_cache,
            fragment_cache,
            generic_cache,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Adopt `container` for `reference`.
    ///
    /// Removes the reference from the record, fragment and generic caches
    /// (ownership transfer, no closing), drops its fragment descriptors from
    /// the fragment cache, resets the reference's key to the null sentinel,
    /// clears its page slot and stamps it with the next log index.
    pub fn put(&self, reference: &Arc<PageReference>, container: PageContainer) {
        let key = reference.cache_key();
        self.record_cache.remove_key(&key);
        self.fragment_cache.remove_key(&key);
        self.generic_cache.remove(&key);
        for fragment in reference.fragment_keys() {
            self.fragment_cache.remove_key(&fragment);
        }

        reference.clear_key();
        reference.unswizzle();

        let mut entries = self.entries.lock();
        reference.set_log_key(entries.len());
        entries.push(container);
    }

    /// The container logged for `reference`, if its log key is a valid index
    /// within this log.
    pub fn get(&self, reference: &PageReference) -> Option<PageContainer> {
        let index = reference.log_key()?;
        self.entries.lock().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Close every logged frame and empty the log (abort path).
    pub fn clear(&self) {
        self.close_entries();
    }

    /// Close every logged frame and empty the log (commit path). The log-key
    /// counter restarts at zero.
    pub fn close(&self) {
        self.close_entries();
    }

    fn close_entries(&self) {
        let drained: Vec<PageContainer> = std::mem::take(&mut *self.entries.lock());
        if drained.is_empty() {
            return;
        }

        // Drain deferred cache maintenance first: a removal hook still in
        // flight for one of these frames must not race our close.
        self.generic_cache.clean_up();

        for container in drained {
            container.complete().close();
            if !container.is_single() {
                container.modified().close();
            }
        }
    }
}

impl Drop for TransactionIntentLog {
    fn drop(&mut self) {
        self.close_entries();
    }
}

// ============================================================================
// Tests
// ============================================================================
