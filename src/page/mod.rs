// # Page Module
//
// In-memory page objects: the record-page frame with its optimistic
// version/guard protocol, the page reference used to key the caches, the
// page container owned by transaction intent logs, and the non-leaf page
// values held by the tier caches.

pub mod container;
pub mod frame;
pub mod guard;
pub mod pages;
pub mod reference;

pub use container::PageContainer;
pub use frame::KeyValueLeafPage;
pub use guard::PageGuard;
pub use pages::{IndexNode, IndexedPage, NameTable, PathSummaryNode, RevisionRootPage};
pub use reference::{PageRefKey, PageReference};
