// # Non-Leaf Page Values
//
// Value types of the caches other than the record-page caches: revision
// roots, name tables, path-summary records and the red-black index nodes.
// None of these own memory segments; record frames stay in the frame caches
// and are only reachable from here through page references.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::common::Revision;
use crate::page::frame::KeyValueLeafPage;
use crate::page::reference::PageReference;

// ============================================================================
// Revision Root
// ============================================================================

/// The root page of one committed revision.
///
/// Holds references to the subtrees of the revision: names, path summary,
/// CAS index, path index and the document index, plus any forwarded
/// references to older fragments.
pub struct RevisionRootPage {
    revision: Revision,
    max_node_key: i64,
    name_page: Arc<PageReference>,
    path_summary_page: Arc<PageReference>,
    cas_page: Arc<PageReference>,
    path_page: Arc<PageReference>,
    document_index_page: Arc<PageReference>,
    forwarded: Vec<Arc<PageReference>>,
}

impl RevisionRootPage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        revision: Revision,
        max_node_key: i64,
        name_page: Arc<PageReference>,
        path_summary_page: Arc<PageReference>,
        cas_page: Arc<PageReference>,
        path_page: Arc<PageReference>,
        document_index_page: Arc<PageReference>,
        forwarded: Vec<Arc<PageReference>>,
    ) -> Self {
        Self {
            revision,
            max_node_key,
            name_page,
            path_summary_page,
            cas_page,
            path_page,
            document_index_page,
            forwarded,
        }
    }

    #[inline(always)]
    pub fn revision(&self) -> Revision {
        self.revision
    }

    #[inline(always)]
    pub fn max_node_key(&self) -> i64 {
        self.max_node_key
    }

    pub fn name_page(&self) -> &Arc<PageReference> {
        &self.name_page
    }

    pub fn path_summary_page(&self) -> &Arc<PageReference> {
        &self.path_summary_page
    }

    pub fn cas_page(&self) -> &Arc<PageReference> {
        &self.cas_page
    }

    pub fn path_page(&self) -> &Arc<PageReference> {
        &self.path_page
    }

    pub fn document_index_page(&self) -> &Arc<PageReference> {
        &self.document_index_page
    }

    /// Every nested page reference of this root.
    pub fn nested_references(&self) -> Vec<&Arc<PageReference>> {
        let mut references = vec![
            &self.name_page,
            &self.path_summary_page,
            &self.cas_page,
            &self.path_page,
            &self.document_index_page,
        ];
        references.extend(self.forwarded.iter());
        references
    }

    /// Null the page slot of every nested reference.
    ///
    /// A cached revision root would otherwise transitively pin frames that
    /// belong to the frame cache, defeating eviction.
    pub fn unswizzle_nested(&self) {
        for reference in self.nested_references() {
            reference.unswizzle();
        }
    }
}

// ============================================================================
// Name Table
// ============================================================================

/// Interned names of one revision and index number.
pub struct NameTable {
    entries: HashMap<u32, String>,
}

impl NameTable {
    pub fn new(entries: HashMap<u32, String>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name_key: u32) -> Option<&str> {
        self.entries.get(&name_key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Approximate heap weight, used by the names cache weigher.
    pub fn byte_weight(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, name)| name.len() + std::mem::size_of::<u32>())
            .sum()
    }
}

// ============================================================================
// Path Summary
// ============================================================================

/// One node of the path summary tree.
#[derive(Debug, Clone)]
pub struct PathSummaryNode {
    pub path_node_key: i64,
    pub parent_key: i64,
    pub name: String,
    pub level: u32,
}

// ============================================================================
// Red-Black Index Node
// ============================================================================

/// Node of an in-memory red-black index tree.
///
/// Nodes link to their parent weakly and to their children strongly, the
/// same direction ownership flows everywhere else. The index-node cache's
/// removal hook unlinks an evicted node from its parent's child slot so the
/// subtree can be dropped.
pub struct IndexNode {
    key: i64,
    value: Bytes,
    red: Mutex<bool>,
    parent: Mutex<Weak<IndexNode>>,
    left: Mutex<Option<Arc<IndexNode>>>,
    right: Mutex<Option<Arc<IndexNode>>>,
}

impl IndexNode {
    pub fn new(key: i64, value: Bytes) -> Arc<Self> {
        Arc::new(Self {
            key,
            value,
            red: Mutex::new(true),
            parent: Mutex::new(Weak::new()),
            left: Mutex::new(None),
            right: Mutex::new(None),
        })
    }

    #[inline(always)]
    pub fn key(&self) -> i64 {
        self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn is_red(&self) -> bool {
        *self.red.lock()
    }

    pub fn set_red(&self, red: bool) {
        *self.red.lock() = red;
    }

    pub fn parent(&self) -> Option<Arc<IndexNode>> {
        self.parent.lock().upgrade()
    }

    pub fn left(&self) -> Option<Arc<IndexNode>> {
        self.left.lock().clone()
    }

    pub fn right(&self) -> Option<Arc<IndexNode>> {
        self.right.lock().clone()
    }

    pub fn set_left(self: &Arc<Self>, child: Option<Arc<IndexNode>>) {
        if let Some(ref node) = child {
            *node.parent.lock() = Arc::downgrade(self);
        }
        *self.left.lock() = child;
    }

    pub fn set_right(self: &Arc<Self>, child: Option<Arc<IndexNode>>) {
        if let Some(ref node) = child {
            *node.parent.lock() = Arc::downgrade(self);
        }
        *self.right.lock() = child;
    }

    /// Detach this node from its parent's child slot.
    pub fn unlink_from_parent(self: &Arc<Self>) {
        if let Some(parent) = self.parent.lock().upgrade() {
            let mut unlinked = false;
            {
                let mut left = parent.left.lock();
                if left.as_ref().map(|n| Arc::ptr_eq(n, self)).unwrap_or(false) {
                    *left = None;
                    unlinked = true;
                }
            }
            if !unlinked {
                let mut right = parent.right.lock();
                if right.as_ref().map(|n| Arc::ptr_eq(n, self)).unwrap_or(false) {
                    *right = None;
                }
            }
        }
        *self.parent.lock() = Weak::new();
    }

    /// Approximate heap weight, used by the index-node cache weigher.
    pub fn byte_weight(&self) -> usize {
        std::mem::size_of::<Self>() + self.value.len()
    }
}

// ============================================================================
// Tagged Page Union
// ============================================================================

/// The value type of the generic page cache.
///
/// Record frames are deliberately rejected by that cache; they live in the
/// sharded frame caches where the sweeper can see them.
#[derive(Clone)]
pub enum IndexedPage {
    RevisionRoot(Arc<RevisionRootPage>),
    Name(Arc<NameTable>),
    PathSummary(Arc<PathSummaryNode>),
    KeyValueLeaf(Arc<KeyValueLeafPage>),
}

impl IndexedPage {
    /// Whether this value is a record-page frame.
    pub fn is_frame(&self) -> bool {
        matches!(self, IndexedPage::KeyValueLeaf(_))
    }
}

// ============================================================================
// Tests
// ============================================================================
