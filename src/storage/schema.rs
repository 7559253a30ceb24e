use std::collections::BTreeSet;
use std::sync::Arc;

use crate::storage::index::Index;
use crate::types::ClusterId;

/// Read-only description of one type (class).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TypeInfo {
    /// Type name.
    pub name: String,
    /// Direct supertypes.
    pub superclasses: Vec<String>,
    /// Direct subtypes.
    pub subclasses: Vec<String>,
    /// Clusters owned directly by this type.
    pub clusters: Vec<ClusterId>,
    /// Abstract types own no clusters.
    pub is_abstract: bool,
}

/// Schema lookups consumed by the planner.
pub trait Schema: Send + Sync {
    /// Resolves a type by name.
    fn get_type(&self, name: &str) -> Option<Arc<TypeInfo>>;

    /// Indexes usable for `type_name`: declared on it or inherited from a supertype.
    fn class_indexes(&self, type_name: &str) -> Vec<Arc<dyn Index>>;

    /// Resolves an index by name.
    fn get_index(&self, name: &str) -> Option<Arc<dyn Index>>;

    /// Resolves a cluster name to its id.
    fn cluster_id(&self, name: &str) -> Option<ClusterId>;

    /// Resolves a cluster id to its name.
    fn cluster_name(&self, id: ClusterId) -> Option<String>;

    /// Type owning a cluster.
    fn type_of_cluster(&self, id: ClusterId) -> Option<String>;

    /// Record count of a type, including subtypes when `polymorphic`.
    fn count(&self, type_name: &str, polymorphic: bool) -> u64;

    /// Record count of one cluster.
    fn count_cluster(&self, id: ClusterId) -> u64;

    /// Returns true if `name` equals `ancestor` or inherits from it.
    fn is_subclass_of(&self, name: &str, ancestor: &str) -> bool {
        if name == ancestor {
            return true;
        }
        let mut stack = vec![name.to_owned()];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(info) = self.get_type(&current) else {
                continue;
            };
            for parent in &info.superclasses {
                if parent == ancestor {
                    return true;
                }
                stack.push(parent.clone());
            }
        }
        false
    }

    /// Clusters of a type and all of its subtypes, sorted and deduplicated.
    fn polymorphic_clusters(&self, type_name: &str) -> Vec<ClusterId> {
        let mut clusters = BTreeSet::new();
        let mut stack = vec![type_name.to_owned()];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(info) = self.get_type(&current) {
                clusters.extend(info.clusters.iter().copied());
                stack.extend(info.subclasses.iter().cloned());
            }
        }
        clusters.into_iter().collect()
    }
}
