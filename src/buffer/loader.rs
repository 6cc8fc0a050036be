// # Page Loader Contract
//
// The collaborator that reconstructs a page on cache miss, typically by
// combining a full page with fragments and materialising the records into
// freshly allocated segments. The buffer manager only calls it through the
// caches' per-key compute, so a loader runs at most once per missing key.

use std::sync::Arc;

use crate::error::Result;
use crate::page::frame::KeyValueLeafPage;
use crate::page::reference::PageReference;

/// Reconstructs a frame from a page reference.
pub trait PageLoader: Send + Sync {
    /// Produce the frame for `reference`, allocating its segments from the
    /// segment allocator. Called only on cache miss.
    fn load(&self, reference: &PageReference) -> Result<Arc<KeyValueLeafPage>>;
}
