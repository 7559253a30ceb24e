//! Result rows flowing between steps.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::value::Value;
use crate::storage::Record;
use crate::types::Rid;

#[derive(Clone, Debug)]
enum Body {
    Projected(Vec<(String, Value)>),
    Bound {
        rid: Rid,
        record: OnceLock<Option<Arc<Record>>>,
    },
}

/// A row produced by a step.
///
/// Either a projected tuple (ordered property map, mutable) or a tuple bound
/// to a stored record (resolved lazily, read-only). Metadata such as `$depth`
/// or `$path` lives in a separate map that projections never surface.
#[derive(Clone, Debug)]
pub struct Tuple {
    body: Body,
    metadata: BTreeMap<String, Value>,
}

impl Tuple {
    /// Creates an empty projected tuple.
    pub fn projected() -> Self {
        Self {
            body: Body::Projected(Vec::new()),
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a projected tuple from `(name, value)` pairs, preserving order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut tuple = Self::projected();
        for (key, value) in pairs {
            tuple.put(key.into(), value.into());
        }
        tuple
    }

    /// Creates a tuple bound to `rid`; the record is loaded on first access.
    pub fn bound(rid: Rid) -> Self {
        Self {
            body: Body::Bound {
                rid,
                record: OnceLock::new(),
            },
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a tuple bound to an already loaded record.
    pub fn from_record(record: Arc<Record>) -> Self {
        let cell = OnceLock::new();
        let rid = record.rid;
        let _ = cell.set(Some(record));
        Self {
            body: Body::Bound { rid, record: cell },
            metadata: BTreeMap::new(),
        }
    }

    /// Returns true when bound to a stored record.
    pub fn is_bound(&self) -> bool {
        matches!(self.body, Body::Bound { .. })
    }

    /// Record id for bound tuples.
    pub fn rid(&self) -> Option<Rid> {
        match &self.body {
            Body::Bound { rid, .. } => Some(*rid),
            Body::Projected(_) => None,
        }
    }

    /// Resolves the bound record, loading it through the context once.
    pub fn record(&self, ctx: &ExecutionContext) -> Result<Option<Arc<Record>>> {
        match &self.body {
            Body::Projected(_) => Ok(None),
            Body::Bound { rid, record } => {
                if let Some(loaded) = record.get() {
                    return Ok(loaded.clone());
                }
                let loaded = ctx.database().records().load(*rid)?;
                Ok(record.get_or_init(|| loaded).clone())
            }
        }
    }

    /// Type name of the bound record.
    pub fn type_name(&self, ctx: &ExecutionContext) -> Result<Option<String>> {
        Ok(self.record(ctx)?.map(|record| record.type_name.clone()))
    }

    /// Reads a property; missing properties are null.
    pub fn property(&self, name: &str, ctx: &ExecutionContext) -> Result<Value> {
        match &self.body {
            Body::Projected(props) => Ok(props
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .unwrap_or(Value::Null)),
            Body::Bound { .. } => Ok(self
                .record(ctx)?
                .and_then(|record| record.properties.get(name).cloned())
                .unwrap_or(Value::Null)),
        }
    }

    /// Reads a projected property without a context.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match &self.body {
            Body::Projected(props) => props
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value),
            Body::Bound { .. } => None,
        }
    }

    /// Returns true if a projected tuple carries `name`.
    pub fn has_property(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Property names in declaration order.
    pub fn property_names(&self, ctx: &ExecutionContext) -> Result<Vec<String>> {
        match &self.body {
            Body::Projected(props) => Ok(props.iter().map(|(key, _)| key.clone()).collect()),
            Body::Bound { .. } => Ok(self
                .record(ctx)?
                .map(|record| record.properties.keys().cloned().collect())
                .unwrap_or_default()),
        }
    }

    /// Projected properties in declaration order.
    pub fn pairs(&self) -> &[(String, Value)] {
        match &self.body {
            Body::Projected(props) => props,
            Body::Bound { .. } => &[],
        }
    }

    /// Sets a property on a projected tuple.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError::ImmutableRecord`] for bound tuples.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        match &self.body {
            Body::Bound { rid, .. } => Err(QuarryError::ImmutableRecord(*rid)),
            Body::Projected(_) => {
                self.put(name.into(), value.into());
                Ok(())
            }
        }
    }

    /// Removes a property from a projected tuple.
    pub fn remove_property(&mut self, name: &str) -> Result<Option<Value>> {
        match &mut self.body {
            Body::Bound { rid, .. } => Err(QuarryError::ImmutableRecord(*rid)),
            Body::Projected(props) => Ok(props
                .iter()
                .position(|(key, _)| key == name)
                .map(|idx| props.remove(idx).1)),
        }
    }

    fn put(&mut self, name: String, value: Value) {
        if let Body::Projected(props) = &mut self.body {
            match props.iter_mut().find(|(key, _)| *key == name) {
                Some(slot) => slot.1 = value,
                None => props.push((name, value)),
            }
        }
    }

    /// Reads a metadata entry.
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Writes a metadata entry; allowed on bound tuples too.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Builder-style [`Tuple::set_metadata`].
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_metadata(key, value);
        self
    }

    /// Traversal depth recorded in `$depth`.
    pub fn depth(&self) -> Option<i64> {
        self.metadata("$depth").and_then(Value::as_i64)
    }

    /// Traversal path recorded in `$path`.
    pub fn path(&self) -> Vec<Rid> {
        match self.metadata("$path") {
            Some(Value::List(items)) => items.iter().filter_map(Value::as_rid).collect(),
            _ => Vec::new(),
        }
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        match (&self.body, &other.body) {
            (Body::Projected(a), Body::Projected(b)) => a == b,
            (Body::Bound { rid: a, .. }, Body::Bound { rid: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Body::Bound { rid, .. } => write!(f, "{rid}"),
            Body::Projected(props) => {
                f.write_str("{")?;
                for (idx, (key, value)) in props.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_tuples_reject_mutation() {
        let mut tuple = Tuple::bound(Rid::new(3, 1));
        let err = tuple.set_property("name", "x").unwrap_err();
        assert_eq!(err, QuarryError::ImmutableRecord(Rid::new(3, 1)));
        tuple.set_metadata("$depth", 2);
        assert_eq!(tuple.depth(), Some(2));
    }

    #[test]
    fn projected_keeps_insertion_order() -> Result<()> {
        let mut tuple = Tuple::from_pairs([("b", 1), ("a", 2)]);
        tuple.set_property("b", 3)?;
        let names: Vec<_> = tuple.pairs().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(tuple.get("b"), Some(&Value::Int(3)));
        assert_eq!(tuple.remove_property("a")?, Some(Value::Int(2)));
        Ok(())
    }

    #[test]
    fn metadata_is_not_part_of_equality() {
        let a = Tuple::bound(Rid::new(1, 1)).with_metadata("$depth", 0);
        let b = Tuple::bound(Rid::new(1, 1));
        assert_eq!(a, b);
    }
}
