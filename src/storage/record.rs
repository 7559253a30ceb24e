use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::query::value::Value;
use crate::types::{ClusterId, Rid};

/// A stored entity as seen by the executor.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Identity.
    pub rid: Rid,
    /// Name of the record's type.
    pub type_name: String,
    /// Property map.
    pub properties: BTreeMap<String, Value>,
}

/// Edge direction relative to a vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Outgoing edges.
    Out,
    /// Incoming edges.
    In,
    /// Both directions.
    Both,
}

impl Direction {
    /// The direction that walks the same edges backwards.
    pub fn reverse(self) -> Self {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
            Direction::Both => Direction::Both,
        }
    }

    /// Lowercase method name, as used in pattern text.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
            Direction::Both => "both",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only record access.
pub trait RecordStore: Send + Sync {
    /// Loads a record; `None` if it does not exist.
    fn load(&self, rid: Rid) -> Result<Option<Arc<Record>>>;

    /// Record ids stored in a cluster, in position order.
    fn scan_cluster(
        &self,
        cluster: ClusterId,
        ascending: bool,
    ) -> Result<Box<dyn Iterator<Item = Rid> + Send>>;

    /// Adjacent vertices over edges with any of `labels` (all labels when empty).
    fn neighbors(&self, rid: Rid, direction: Direction, labels: &[String]) -> Result<Vec<Rid>>;
}
