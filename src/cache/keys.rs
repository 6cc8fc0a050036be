// # Composite Cache Keys
//
// Small immutable records keying the tier caches. Every key carries the
// (database, resource) pair so that key-scoped invalidation can sweep any
// cache without knowing its concrete shape.

use crate::common::{DatabaseId, IndexKind, ResourceId, Revision};
use crate::page::reference::PageRefKey;

/// A key that can be matched against database- and resource-scoped
/// invalidation.
pub trait ScopedKey {
    fn database_id(&self) -> DatabaseId;
    fn resource_id(&self) -> ResourceId;

    fn in_database(&self, database_id: DatabaseId) -> bool {
        self.database_id() == database_id
    }

    fn in_resource(&self, database_id: DatabaseId, resource_id: ResourceId) -> bool {
        self.database_id() == database_id && self.resource_id() == resource_id
    }
}

impl ScopedKey for PageRefKey {
    fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    fn resource_id(&self) -> ResourceId {
        self.resource_id
    }
}

/// Key of the revision-root cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RevisionRootKey {
    pub database_id: DatabaseId,
    pub resource_id: ResourceId,
    pub revision: Revision,
}

impl ScopedKey for RevisionRootKey {
    fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    fn resource_id(&self) -> ResourceId {
        self.resource_id
    }
}

/// Key of the red-black index-node cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexLogKey {
    pub database_id: DatabaseId,
    pub resource_id: ResourceId,
    pub node_key: i64,
    pub revision: Revision,
    pub index_kind: IndexKind,
    pub index_number: u32,
}

impl ScopedKey for IndexLogKey {
    fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    fn resource_id(&self) -> ResourceId {
        self.resource_id
    }
}

/// Key of the names cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamesCacheKey {
    pub database_id: DatabaseId,
    pub resource_id: ResourceId,
    pub revision: Revision,
    pub index_number: u32,
}

impl ScopedKey for NamesCacheKey {
    fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    fn resource_id(&self) -> ResourceId {
        self.resource_id
    }
}

/// Key of the path-summary cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathSummaryKey {
    pub database_id: DatabaseId,
    pub resource_id: ResourceId,
    pub path_node_key: i64,
}

impl ScopedKey for PathSummaryKey {
    fn database_id(&self) -> DatabaseId {
        self.database_id
    }

    fn resource_id(&self) -> ResourceId {
        self.resource_id
    }
}
