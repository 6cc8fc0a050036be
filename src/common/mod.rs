// # Common Types
//
// Shared identifiers and small types used across all VersoDB modules. The
// buffer layer keys everything by (database, resource) pairs so that a single
// process-wide cache hierarchy can serve any number of databases.

use serde::{Deserialize, Serialize};

// ============================================================================
// Type Aliases - Shared Identifiers
// ============================================================================

/// Unique identifier for a database within the process
pub type DatabaseId = u32;

/// Unique identifier for a resource (a stored tree) within a database
pub type ResourceId = u32;

/// Key of a page inside a resource's page file
pub type PageKey = i64;

/// Revision number of a resource; every commit produces the next revision
pub type Revision = u64;

/// Unique identifier for transactions
pub type TransactionId = u64;

/// Sentinel for "no page": a reference whose key is null points nowhere yet
pub const NULL_PAGE_KEY: PageKey = -1;

// ============================================================================
// Index Kinds
// ============================================================================

/// Which index tree a page belongs to.
///
/// Pages of different index kinds share the cache hierarchy; the kind is part
/// of the composite keys so lookups never cross trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// The main document index holding the record pages
    Document,

    /// Name-to-key dictionaries
    Name,

    /// Path index
    Path,

    /// Content-and-structure index
    Cas,

    /// Path summary tree
    PathSummary,

    /// Dewey-ID to record-ID mapping
    DeweyIdToRecordId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_page_key_sentinel() {
        assert_eq!(NULL_PAGE_KEY, -1);
        assert!(NULL_PAGE_KEY < 0);
    }

    #[test]
    fn test_index_kind_is_copy() {
        let kind = IndexKind::Document;
        let copied = kind;
        assert_eq!(kind, copied);
    }
}
