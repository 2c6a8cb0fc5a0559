//! Table repository.
//!
//! - **[`table`]**: [`IndexedTable`] rows/columns plus `key:value` selections.
//! - **[`peer`]**: HTTP client for a remote table peer.
//! - **[`repository`]**: [`PersistentTables`], resolving tables from the peer,
//!   memory or a backing store.

pub mod peer;
pub mod repository;
pub mod table;

pub use peer::TablePeer;
pub use repository::{PersistentTables, SharedTable};
pub use table::{IndexedTable, Row, Select, parse_selects};
