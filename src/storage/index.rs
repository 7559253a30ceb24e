use std::cmp::Ordering;
use std::fmt;

use smallvec::SmallVec;

use crate::error::Result;
use crate::query::value::Value;
use crate::types::Rid;

/// Composite index key.
///
/// A key used as a scan bound may carry fewer components than the index has
/// fields; it then matches every stored key sharing that prefix.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct IndexKey(SmallVec<[Value; 2]>);

impl IndexKey {
    /// Builds a key from its components.
    pub fn new(components: impl IntoIterator<Item = Value>) -> Self {
        Self(components.into_iter().collect())
    }

    /// Single-component key.
    pub fn single(value: impl Into<Value>) -> Self {
        let mut parts = SmallVec::new();
        parts.push(value.into());
        Self(parts)
    }

    /// The key under which null entries are stored.
    pub fn null() -> Self {
        Self::single(Value::Null)
    }

    /// Key components.
    pub fn components(&self) -> &[Value] {
        &self.0
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the key has no components (an unbounded scan end).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true when every component is null and there is at least one.
    pub fn is_null(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(Value::is_null)
    }

    /// Compares the leading components of `self` against a (possibly shorter) bound.
    pub fn compare_prefix(&self, bound: &IndexKey) -> Ordering {
        for (stored, bound) in self.0.iter().zip(bound.0.iter()) {
            match stored.total_cmp(bound) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        if self.0.len() < bound.0.len() {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str("]")
    }
}

/// How a map-typed field is indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapKeyMode {
    /// The map's keys are indexed.
    ByKey,
    /// The map's values are indexed.
    ByValue,
}

/// One declared index field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IndexField {
    /// Property name.
    pub name: String,
    /// Sub-index mode for map-typed properties.
    pub map_mode: Option<MapKeyMode>,
}

impl IndexField {
    /// Plain property field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            map_mode: None,
        }
    }
}

impl fmt::Display for IndexField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.map_mode {
            None => f.write_str(&self.name),
            Some(MapKeyMode::ByKey) => write!(f, "{} by key", self.name),
            Some(MapKeyMode::ByValue) => write!(f, "{} by value", self.name),
        }
    }
}

/// Physical organisation of an index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Sorted; supports range scans and ordered iteration.
    Ordered,
    /// Hashed; equality lookups on the full key only.
    Hash,
    /// Word index answering text containment.
    FullText,
}

/// Static index metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexDefinition {
    /// Unique index name.
    pub name: String,
    /// Type the index is declared on.
    pub type_name: String,
    /// Declared fields, in key order.
    pub fields: Vec<IndexField>,
    /// Physical organisation.
    pub kind: IndexKind,
    /// At most one record per key.
    pub unique: bool,
    /// Null keys are not stored at all.
    pub ignore_nulls: bool,
    /// At least one field is a collection, so one record may appear under several keys.
    pub multi_value: bool,
}

impl IndexDefinition {
    /// Ordered, non-unique index over plain fields.
    pub fn ordered(name: impl Into<String>, type_name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            fields: fields.iter().map(|f| IndexField::new(*f)).collect(),
            kind: IndexKind::Ordered,
            unique: false,
            ignore_nulls: false,
            multi_value: false,
        }
    }

    /// Hash index over plain fields.
    pub fn hash(name: impl Into<String>, type_name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            kind: IndexKind::Hash,
            ..Self::ordered(name, type_name, fields)
        }
    }

    /// Full-text index over one string field.
    pub fn full_text(name: impl Into<String>, type_name: impl Into<String>, field: &str) -> Self {
        Self {
            kind: IndexKind::FullText,
            ignore_nulls: true,
            multi_value: true,
            ..Self::ordered(name, type_name, &[field])
        }
    }

    /// Marks the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets whether null keys are skipped.
    pub fn ignoring_nulls(mut self, ignore: bool) -> Self {
        self.ignore_nulls = ignore;
        self
    }

    /// Marks the index as indexing collection elements.
    pub fn multi_value(mut self) -> Self {
        self.multi_value = true;
        self
    }

    /// Indexes the keys (or values) of map field `name`.
    pub fn with_map_mode(mut self, name: &str, mode: MapKeyMode) -> Self {
        for field in self.fields.iter_mut().filter(|f| f.name == name) {
            field.map_mode = Some(mode);
        }
        self.multi_value = true;
        self
    }

    /// Field names in key order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Sorted iteration and range scans are available.
    pub fn supports_ordered_iteration(&self) -> bool {
        self.kind == IndexKind::Ordered
    }

    /// Equality and range operators can be answered.
    pub fn supports_equality(&self) -> bool {
        self.kind != IndexKind::FullText
    }

    /// Text containment can be answered.
    pub fn is_full_text(&self) -> bool {
        self.kind == IndexKind::FullText
    }
}

/// Cursor over `(key, rid)` index entries.
///
/// `close` releases the underlying resource; implementations must tolerate
/// repeated calls but callers close exactly once.
pub trait IndexCursor: Send {
    /// Returns the next entry, or `None` when exhausted.
    fn next_entry(&mut self) -> Result<Option<(IndexKey, Rid)>>;
    /// Releases the cursor.
    fn close(&mut self);
}

/// Boxed index cursor.
pub type BoxIndexCursor = Box<dyn IndexCursor>;

/// Read access to one index.
pub trait Index: Send + Sync {
    /// Static metadata.
    fn definition(&self) -> &IndexDefinition;

    /// Index name.
    fn name(&self) -> &str {
        &self.definition().name
    }

    /// Number of stored entries, null entries included.
    fn size(&self) -> u64;

    /// Every non-null entry in key order.
    fn stream(&self, ascending: bool) -> Result<BoxIndexCursor>;

    /// Entries whose key starts with `key`.
    fn stream_entries(&self, key: &IndexKey, ascending: bool) -> Result<BoxIndexCursor>;

    /// Entries between two bounds.
    fn stream_entries_between(
        &self,
        from: &IndexKey,
        from_inclusive: bool,
        to: &IndexKey,
        to_inclusive: bool,
        ascending: bool,
    ) -> Result<BoxIndexCursor>;

    /// Entries at or above `from`.
    fn stream_entries_major(
        &self,
        from: &IndexKey,
        inclusive: bool,
        ascending: bool,
    ) -> Result<BoxIndexCursor>;

    /// Entries at or below `to`.
    fn stream_entries_minor(
        &self,
        to: &IndexKey,
        inclusive: bool,
        ascending: bool,
    ) -> Result<BoxIndexCursor>;

    /// Entries stored under exactly `key`; [`IndexKey::null`] addresses null entries.
    fn get_rids(&self, key: &IndexKey) -> Result<BoxIndexCursor>;
}

impl fmt::Debug for dyn Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name())
            .field("kind", &self.definition().kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_comparison_ignores_trailing_components() {
        let stored = IndexKey::new([Value::Int(1), Value::Int(7)]);
        assert_eq!(stored.compare_prefix(&IndexKey::single(1)), Ordering::Equal);
        assert_eq!(stored.compare_prefix(&IndexKey::single(2)), Ordering::Less);
        assert_eq!(
            stored.compare_prefix(&IndexKey::new([Value::Int(1), Value::Int(5)])),
            Ordering::Greater
        );
        assert_eq!(stored.compare_prefix(&IndexKey::default()), Ordering::Equal);
    }

    #[test]
    fn null_key_detection() {
        assert!(IndexKey::null().is_null());
        assert!(!IndexKey::default().is_null());
        assert!(!IndexKey::new([Value::Null, Value::Int(1)]).is_null());
    }

    #[test]
    fn field_display_marks_map_mode() {
        let def = IndexDefinition::ordered("T.tags", "T", &["tags"])
            .with_map_mode("tags", MapKeyMode::ByKey);
        assert_eq!(def.fields[0].to_string(), "tags by key");
        assert!(def.multi_value);
    }
}
