//! Storage collaborator interfaces consumed by the planner and executor.
//!
//! The engine never touches on-disk structures directly; it reads through the
//! [`Index`], [`Schema`], [`RecordStore`] and [`StatsStore`] traits. The
//! [`memory`] module provides transient implementations of all four.

/// Index metadata, keys and cursor traits.
pub mod index;

/// In-memory implementations of the collaborator traits.
pub mod memory;

/// Records, edge directions and record access.
pub mod record;

/// Type hierarchy and cluster lookups.
pub mod schema;

/// Historical index lookup statistics.
pub mod stats;

pub use index::{
    BoxIndexCursor, Index, IndexCursor, IndexDefinition, IndexField, IndexKey, IndexKind,
    MapKeyMode,
};
pub use memory::{MemoryDatabase, MemoryIndex};
pub use record::{Direction, Record, RecordStore};
pub use schema::{Schema, TypeInfo};
pub use stats::{IndexStatKey, QueryStats, StatsStore};
