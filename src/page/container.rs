// # Page Container
//
// A pair of (complete, modified) page frames owned by a transaction intent
// log. The complete side is the authoritative snapshot; the modified side is
// the copy being mutated. Both sides may be the same object for freshly
// created pages.

use std::sync::Arc;

use crate::page::frame::KeyValueLeafPage;

#[derive(Clone)]
pub struct PageContainer {
    complete: Arc<KeyValueLeafPage>,
    modified: Arc<KeyValueLeafPage>,
}

impl PageContainer {
    pub fn new(complete: Arc<KeyValueLeafPage>, modified: Arc<KeyValueLeafPage>) -> Self {
        Self { complete, modified }
    }

    /// A container whose complete and modified sides are the same frame.
    pub fn single(frame: Arc<KeyValueLeafPage>) -> Self {
        Self {
            complete: frame.clone(),
            modified: frame,
        }
    }

    #[inline(always)]
    pub fn complete(&self) -> &Arc<KeyValueLeafPage> {
        &self.complete
    }

    #[inline(always)]
    pub fn modified(&self) -> &Arc<KeyValueLeafPage> {
        &self.modified
    }

    /// Whether both sides are the same frame object.
    pub fn is_single(&self) -> bool {
        Arc::ptr_eq(&self.complete, &self.modified)
    }
}

impl std::fmt::Debug for PageContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageContainer")
            .field("complete", &self.complete.page_key())
            .field("modified", &self.modified.page_key())
            .field("single", &self.is_single())
            .finish()
    }
}
