//! Identifier types shared by storage collaborators and the executor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QuarryError;

/// Storage container identifier.
pub type ClusterId = i32;

/// Record identifier: a (cluster, position) pair addressing one stored entity.
///
/// Ordering is lexicographic on `(cluster, position)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Owning cluster.
    pub cluster: ClusterId,
    /// Position inside the cluster.
    pub position: i64,
}

impl Rid {
    /// Distinguished unset identifier.
    pub const INVALID: Rid = Rid {
        cluster: -1,
        position: -1,
    };

    /// Creates a new record identifier.
    pub const fn new(cluster: ClusterId, position: i64) -> Self {
        Self { cluster, position }
    }

    /// Returns true unless this is [`Rid::INVALID`] or otherwise negative.
    pub fn is_valid(&self) -> bool {
        self.cluster >= 0 && self.position >= 0
    }
}

impl Default for Rid {
    fn default() -> Self {
        Rid::INVALID
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cluster, self.position)
    }
}

impl FromStr for Rid {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix('#').unwrap_or(s);
        let (cluster, position) = body
            .split_once(':')
            .ok_or_else(|| QuarryError::Invalid(format!("malformed record id '{s}'")))?;
        let cluster = cluster
            .parse::<ClusterId>()
            .map_err(|err| QuarryError::Invalid(format!("malformed record id '{s}': {err}")))?;
        let position = position
            .parse::<i64>()
            .map_err(|err| QuarryError::Invalid(format!("malformed record id '{s}': {err}")))?;
        Ok(Rid { cluster, position })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let rid: Rid = "#12:7".parse().unwrap();
        assert_eq!(rid, Rid::new(12, 7));
        assert_eq!(rid.to_string(), "#12:7");
        assert!("12-7".parse::<Rid>().is_err());
    }

    #[test]
    fn ordering_is_cluster_then_position() {
        assert!(Rid::new(1, 9) < Rid::new(2, 0));
        assert!(Rid::new(2, 0) < Rid::new(2, 1));
        assert!(!Rid::INVALID.is_valid());
    }
}
