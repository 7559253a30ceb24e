//! In-memory implementations of the storage collaborator traits.
//!
//! Used by tests and by embedders that want to run plans over transient data.
//! Indexes are kept in sync with inserted records.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{QuarryError, Result};
use crate::query::context::Database;
use crate::query::value::Value;
use crate::storage::index::{
    BoxIndexCursor, Index, IndexCursor, IndexDefinition, IndexKey, IndexKind, MapKeyMode,
};
use crate::storage::record::{Direction, Record, RecordStore};
use crate::storage::schema::{Schema, TypeInfo};
use crate::storage::stats::QueryStats;
use crate::types::{ClusterId, Rid};

/// Counts cursors handed out by a [`MemoryIndex`].
#[derive(Debug, Default)]
pub struct CursorTracker {
    open: AtomicUsize,
    opened: AtomicUsize,
}

impl CursorTracker {
    /// Cursors opened and not yet closed.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Cursors opened since creation.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SnapshotCursor {
    entries: std::vec::IntoIter<(IndexKey, Rid)>,
    tracker: Arc<CursorTracker>,
    closed: bool,
}

impl SnapshotCursor {
    fn new(entries: Vec<(IndexKey, Rid)>, tracker: Arc<CursorTracker>) -> Self {
        tracker.acquire();
        Self {
            entries: entries.into_iter(),
            tracker,
            closed: false,
        }
    }
}

impl IndexCursor for SnapshotCursor {
    fn next_entry(&mut self) -> Result<Option<(IndexKey, Rid)>> {
        if self.closed {
            return Err(QuarryError::internal("read from a closed index cursor"));
        }
        Ok(self.entries.next())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.tracker.release();
        }
    }
}

impl Drop for SnapshotCursor {
    fn drop(&mut self) {
        self.close();
    }
}

/// Index held in a `BTreeMap`, with null entries kept aside.
#[derive(Debug)]
pub struct MemoryIndex {
    definition: IndexDefinition,
    entries: RwLock<BTreeMap<IndexKey, Vec<Rid>>>,
    nulls: RwLock<Vec<Rid>>,
    tracker: Arc<CursorTracker>,
}

impl MemoryIndex {
    /// Creates an empty index.
    pub fn new(definition: IndexDefinition) -> Self {
        Self {
            definition,
            entries: RwLock::new(BTreeMap::new()),
            nulls: RwLock::new(Vec::new()),
            tracker: Arc::new(CursorTracker::default()),
        }
    }

    /// Cursor bookkeeping for leak checks.
    pub fn cursors(&self) -> &CursorTracker {
        &self.tracker
    }

    /// Adds an entry; all-null keys go to the null bucket unless nulls are ignored.
    pub fn put(&self, key: IndexKey, rid: Rid) -> Result<()> {
        if key.is_null() {
            if !self.definition.ignore_nulls {
                self.nulls.write().push(rid);
            }
            return Ok(());
        }
        let mut entries = self.entries.write();
        let rids = entries.entry(key.clone()).or_default();
        if self.definition.unique && !rids.is_empty() && !rids.contains(&rid) {
            return Err(QuarryError::Storage(format!(
                "duplicate key {key} in unique index {}",
                self.definition.name
            )));
        }
        if let Err(pos) = rids.binary_search(&rid) {
            rids.insert(pos, rid);
        }
        Ok(())
    }

    /// Keys a record's properties produce under this index.
    pub fn keys_for(&self, properties: &BTreeMap<String, Value>) -> Vec<IndexKey> {
        let mut per_field: Vec<Vec<Value>> = Vec::with_capacity(self.definition.fields.len());
        for field in &self.definition.fields {
            let value = properties.get(&field.name).cloned().unwrap_or(Value::Null);
            let parts = match (self.definition.kind, field.map_mode, value) {
                (IndexKind::FullText, _, Value::String(text)) => words(&text)
                    .into_iter()
                    .map(Value::String)
                    .collect(),
                (IndexKind::FullText, _, _) => Vec::new(),
                (_, Some(MapKeyMode::ByKey), Value::Map(map)) => {
                    map.keys().cloned().map(Value::String).collect()
                }
                (_, Some(MapKeyMode::ByValue), Value::Map(map)) => map.into_values().collect(),
                (_, _, Value::List(items)) if self.definition.multi_value => items,
                (_, _, other) => vec![other],
            };
            if parts.is_empty() {
                return Vec::new();
            }
            per_field.push(parts);
        }
        let mut keys: Vec<Vec<Value>> = vec![Vec::new()];
        for parts in per_field {
            let mut next = Vec::with_capacity(keys.len() * parts.len());
            for prefix in &keys {
                for part in &parts {
                    let mut key = prefix.clone();
                    key.push(part.clone());
                    next.push(key);
                }
            }
            keys = next;
        }
        keys.into_iter().map(IndexKey::new).collect()
    }

    fn collect<F>(&self, keep: F, ascending: bool) -> Vec<(IndexKey, Rid)>
    where
        F: Fn(&IndexKey) -> bool,
    {
        let entries = self.entries.read();
        let mut out: Vec<(IndexKey, Rid)> = entries
            .iter()
            .filter(|(key, _)| keep(key))
            .flat_map(|(key, rids)| rids.iter().map(move |rid| (key.clone(), *rid)))
            .collect();
        if !ascending {
            out.reverse();
        }
        out
    }

    fn cursor(&self, entries: Vec<(IndexKey, Rid)>) -> BoxIndexCursor {
        Box::new(SnapshotCursor::new(entries, Arc::clone(&self.tracker)))
    }

    fn full_text_lookup(&self, key: &IndexKey) -> Vec<(IndexKey, Rid)> {
        let Some(Value::String(text)) = key.components().first() else {
            return Vec::new();
        };
        let entries = self.entries.read();
        let mut matched: Option<BTreeSet<Rid>> = None;
        for word in words(text) {
            let rids: BTreeSet<Rid> = entries
                .get(&IndexKey::single(word))
                .map(|rids| rids.iter().copied().collect())
                .unwrap_or_default();
            matched = Some(match matched {
                None => rids,
                Some(acc) => acc.intersection(&rids).copied().collect(),
            });
        }
        matched
            .unwrap_or_default()
            .into_iter()
            .map(|rid| (key.clone(), rid))
            .collect()
    }
}

fn words(text: &str) -> Vec<String> {
    let mut out: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    out.sort();
    out.dedup();
    out
}

impl Index for MemoryIndex {
    fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    fn size(&self) -> u64 {
        let entries: usize = self.entries.read().values().map(Vec::len).sum();
        (entries + self.nulls.read().len()) as u64
    }

    fn stream(&self, ascending: bool) -> Result<BoxIndexCursor> {
        Ok(self.cursor(self.collect(|_| true, ascending)))
    }

    fn stream_entries(&self, key: &IndexKey, ascending: bool) -> Result<BoxIndexCursor> {
        if self.definition.is_full_text() {
            return Ok(self.cursor(self.full_text_lookup(key)));
        }
        if key.is_null() {
            return self.get_rids(key);
        }
        Ok(self.cursor(self.collect(
            |stored| stored.compare_prefix(key).is_eq(),
            ascending,
        )))
    }

    fn stream_entries_between(
        &self,
        from: &IndexKey,
        from_inclusive: bool,
        to: &IndexKey,
        to_inclusive: bool,
        ascending: bool,
    ) -> Result<BoxIndexCursor> {
        Ok(self.cursor(self.collect(
            |stored| above(stored, from, from_inclusive) && below(stored, to, to_inclusive),
            ascending,
        )))
    }

    fn stream_entries_major(
        &self,
        from: &IndexKey,
        inclusive: bool,
        ascending: bool,
    ) -> Result<BoxIndexCursor> {
        Ok(self.cursor(self.collect(|stored| above(stored, from, inclusive), ascending)))
    }

    fn stream_entries_minor(
        &self,
        to: &IndexKey,
        inclusive: bool,
        ascending: bool,
    ) -> Result<BoxIndexCursor> {
        Ok(self.cursor(self.collect(|stored| below(stored, to, inclusive), ascending)))
    }

    fn get_rids(&self, key: &IndexKey) -> Result<BoxIndexCursor> {
        if key.is_null() {
            let nulls = self.nulls.read();
            let entries = nulls.iter().map(|rid| (IndexKey::null(), *rid)).collect();
            return Ok(self.cursor(entries));
        }
        let entries = self
            .entries
            .read()
            .get(key)
            .map(|rids| rids.iter().map(|rid| (key.clone(), *rid)).collect())
            .unwrap_or_default();
        Ok(self.cursor(entries))
    }
}

/// A null component never satisfies a bound on the same position.
fn null_within(stored: &IndexKey, bound: &IndexKey) -> bool {
    stored
        .components()
        .iter()
        .zip(bound.components())
        .any(|(value, limit)| value.is_null() && !limit.is_null())
}

fn above(stored: &IndexKey, from: &IndexKey, inclusive: bool) -> bool {
    if null_within(stored, from) {
        return false;
    }
    match stored.compare_prefix(from) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => inclusive,
        std::cmp::Ordering::Less => false,
    }
}

fn below(stored: &IndexKey, to: &IndexKey, inclusive: bool) -> bool {
    if null_within(stored, to) {
        return false;
    }
    match stored.compare_prefix(to) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Equal => inclusive,
        std::cmp::Ordering::Greater => false,
    }
}

#[derive(Debug)]
struct Cluster {
    name: String,
    type_name: String,
    records: BTreeMap<i64, Arc<Record>>,
    next_position: i64,
}

#[derive(Debug, Default)]
struct Inner {
    types: FxHashMap<String, TypeInfo>,
    clusters: Vec<Cluster>,
    indexes: Vec<Arc<MemoryIndex>>,
    out_edges: FxHashMap<Rid, Vec<(String, Rid)>>,
    in_edges: FxHashMap<Rid, Vec<(String, Rid)>>,
}

impl Inner {
    fn is_subclass_of(&self, name: &str, ancestor: &str) -> bool {
        let mut stack = vec![name];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(info) = self.types.get(current) {
                stack.extend(info.superclasses.iter().map(String::as_str));
            }
        }
        false
    }

    fn type_clusters(&self, name: &str, polymorphic: bool) -> Vec<ClusterId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![name];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(info) = self.types.get(current) {
                out.extend(info.clusters.iter().copied());
                if polymorphic {
                    stack.extend(info.subclasses.iter().map(String::as_str));
                }
            }
        }
        out.into_iter().collect()
    }

    fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        usize::try_from(id).ok().and_then(|idx| self.clusters.get(idx))
    }

    fn new_cluster(&mut self, name: &str, type_name: &str) -> Result<ClusterId> {
        if self.clusters.iter().any(|c| c.name == name) {
            return Err(QuarryError::Invalid(format!("cluster '{name}' already exists")));
        }
        let id = ClusterId::try_from(self.clusters.len())
            .map_err(|_| QuarryError::Storage("cluster id space exhausted".into()))?;
        self.clusters.push(Cluster {
            name: name.to_owned(),
            type_name: type_name.to_owned(),
            records: BTreeMap::new(),
            next_position: 0,
        });
        Ok(id)
    }
}

/// Transient database implementing [`Schema`] and [`RecordStore`], with a
/// [`QueryStats`] store alongside.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    inner: RwLock<Inner>,
    stats: Arc<QueryStats>,
}

impl MemoryDatabase {
    /// Creates an empty database.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bundles this database as the collaborators of an execution context.
    pub fn database(self: &Arc<Self>) -> Database {
        Database::new(
            Arc::clone(self) as Arc<dyn Schema>,
            Arc::clone(self) as Arc<dyn RecordStore>,
            Arc::clone(&self.stats) as Arc<dyn crate::storage::StatsStore>,
        )
    }

    /// Statistics store.
    pub fn stats(&self) -> Arc<QueryStats> {
        Arc::clone(&self.stats)
    }

    /// Creates a concrete type with a default cluster named after it.
    pub fn create_type(&self, name: &str, superclasses: &[&str]) -> Result<ClusterId> {
        self.define_type(name, superclasses, false)?;
        let mut inner = self.inner.write();
        let id = inner.new_cluster(&name.to_lowercase(), name)?;
        if let Some(info) = inner.types.get_mut(name) {
            info.clusters.push(id);
        }
        Ok(id)
    }

    /// Creates an abstract type without clusters.
    pub fn create_abstract_type(&self, name: &str, superclasses: &[&str]) -> Result<()> {
        self.define_type(name, superclasses, true)
    }

    fn define_type(&self, name: &str, superclasses: &[&str], is_abstract: bool) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.types.contains_key(name) {
            return Err(QuarryError::Invalid(format!("type '{name}' already exists")));
        }
        for parent in superclasses {
            let info = inner
                .types
                .get_mut(*parent)
                .ok_or_else(|| QuarryError::TypeNotFound((*parent).to_owned()))?;
            info.subclasses.push(name.to_owned());
        }
        inner.types.insert(
            name.to_owned(),
            TypeInfo {
                name: name.to_owned(),
                superclasses: superclasses.iter().map(|s| (*s).to_owned()).collect(),
                subclasses: Vec::new(),
                clusters: Vec::new(),
                is_abstract,
            },
        );
        debug!(type_name = name, is_abstract, "type created");
        Ok(())
    }

    /// Adds another cluster to a concrete type.
    pub fn add_cluster(&self, type_name: &str, cluster_name: &str) -> Result<ClusterId> {
        let mut inner = self.inner.write();
        if !inner.types.contains_key(type_name) {
            return Err(QuarryError::TypeNotFound(type_name.to_owned()));
        }
        let id = inner.new_cluster(cluster_name, type_name)?;
        if let Some(info) = inner.types.get_mut(type_name) {
            info.clusters.push(id);
        }
        Ok(id)
    }

    /// Creates an index and fills it from existing records.
    pub fn create_index(&self, definition: IndexDefinition) -> Result<Arc<MemoryIndex>> {
        let mut inner = self.inner.write();
        if !inner.types.contains_key(&definition.type_name) {
            return Err(QuarryError::TypeNotFound(definition.type_name.clone()));
        }
        if inner.indexes.iter().any(|i| i.name() == definition.name) {
            return Err(QuarryError::Invalid(format!(
                "index '{}' already exists",
                definition.name
            )));
        }
        let index = Arc::new(MemoryIndex::new(definition));
        for cluster in inner.type_clusters(&index.definition().type_name, true) {
            if let Some(cluster) = inner.cluster(cluster) {
                for record in cluster.records.values() {
                    for key in index.keys_for(&record.properties) {
                        index.put(key, record.rid)?;
                    }
                }
            }
        }
        inner.indexes.push(Arc::clone(&index));
        Ok(index)
    }

    /// Typed access to an index created through this database.
    pub fn memory_index(&self, name: &str) -> Option<Arc<MemoryIndex>> {
        self.inner
            .read()
            .indexes
            .iter()
            .find(|i| i.name() == name)
            .cloned()
    }

    /// Inserts a record into the first cluster of `type_name`.
    pub fn insert<I, K, V>(&self, type_name: &str, properties: I) -> Result<Rid>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let cluster = {
            let inner = self.inner.read();
            let info = inner
                .types
                .get(type_name)
                .ok_or_else(|| QuarryError::TypeNotFound(type_name.to_owned()))?;
            *info.clusters.first().ok_or_else(|| {
                QuarryError::Invalid(format!("type '{type_name}' has no cluster"))
            })?
        };
        self.insert_into(cluster, properties)
    }

    /// Inserts a record into a specific cluster.
    pub fn insert_into<I, K, V>(&self, cluster: ClusterId, properties: I) -> Result<Rid>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let properties: BTreeMap<String, Value> = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut inner = self.inner.write();
        let idx = usize::try_from(cluster)
            .ok()
            .filter(|idx| *idx < inner.clusters.len())
            .ok_or_else(|| QuarryError::ClusterNotFound(cluster.to_string()))?;
        let type_name = inner.clusters[idx].type_name.clone();
        let position = inner.clusters[idx].next_position;
        let rid = Rid::new(cluster, position);
        let targets: Vec<Arc<MemoryIndex>> = inner
            .indexes
            .iter()
            .filter(|index| inner.is_subclass_of(&type_name, &index.definition().type_name))
            .cloned()
            .collect();
        for index in &targets {
            for key in index.keys_for(&properties) {
                index.put(key, rid)?;
            }
        }
        let record = Arc::new(Record {
            rid,
            type_name,
            properties,
        });
        let slot = &mut inner.clusters[idx];
        slot.records.insert(position, record);
        slot.next_position += 1;
        Ok(rid)
    }

    /// Adds a labelled edge `from -> to`.
    pub fn add_edge(&self, from: Rid, label: &str, to: Rid) -> Result<()> {
        let mut inner = self.inner.write();
        for rid in [from, to] {
            let exists = inner
                .cluster(rid.cluster)
                .is_some_and(|c| c.records.contains_key(&rid.position));
            if !exists {
                return Err(QuarryError::Storage(format!("record {rid} does not exist")));
            }
        }
        inner
            .out_edges
            .entry(from)
            .or_default()
            .push((label.to_owned(), to));
        inner
            .in_edges
            .entry(to)
            .or_default()
            .push((label.to_owned(), from));
        Ok(())
    }
}

impl Schema for MemoryDatabase {
    fn get_type(&self, name: &str) -> Option<Arc<TypeInfo>> {
        self.inner.read().types.get(name).cloned().map(Arc::new)
    }

    fn class_indexes(&self, type_name: &str) -> Vec<Arc<dyn Index>> {
        let inner = self.inner.read();
        inner
            .indexes
            .iter()
            .filter(|index| inner.is_subclass_of(type_name, &index.definition().type_name))
            .map(|index| Arc::clone(index) as Arc<dyn Index>)
            .collect()
    }

    fn get_index(&self, name: &str) -> Option<Arc<dyn Index>> {
        self.memory_index(name).map(|index| index as Arc<dyn Index>)
    }

    fn cluster_id(&self, name: &str) -> Option<ClusterId> {
        let inner = self.inner.read();
        inner
            .clusters
            .iter()
            .position(|c| c.name == name)
            .and_then(|idx| ClusterId::try_from(idx).ok())
    }

    fn cluster_name(&self, id: ClusterId) -> Option<String> {
        self.inner.read().cluster(id).map(|c| c.name.clone())
    }

    fn type_of_cluster(&self, id: ClusterId) -> Option<String> {
        self.inner.read().cluster(id).map(|c| c.type_name.clone())
    }

    fn count(&self, type_name: &str, polymorphic: bool) -> u64 {
        let inner = self.inner.read();
        inner
            .type_clusters(type_name, polymorphic)
            .into_iter()
            .filter_map(|id| inner.cluster(id))
            .map(|c| c.records.len() as u64)
            .sum()
    }

    fn count_cluster(&self, id: ClusterId) -> u64 {
        self.inner
            .read()
            .cluster(id)
            .map(|c| c.records.len() as u64)
            .unwrap_or(0)
    }
}

impl RecordStore for MemoryDatabase {
    fn load(&self, rid: Rid) -> Result<Option<Arc<Record>>> {
        Ok(self
            .inner
            .read()
            .cluster(rid.cluster)
            .and_then(|c| c.records.get(&rid.position).cloned()))
    }

    fn scan_cluster(
        &self,
        cluster: ClusterId,
        ascending: bool,
    ) -> Result<Box<dyn Iterator<Item = Rid> + Send>> {
        let inner = self.inner.read();
        let cluster = inner
            .cluster(cluster)
            .ok_or_else(|| QuarryError::ClusterNotFound(cluster.to_string()))?;
        let mut rids: Vec<Rid> = cluster.records.values().map(|r| r.rid).collect();
        if !ascending {
            rids.reverse();
        }
        Ok(Box::new(rids.into_iter()))
    }

    fn neighbors(&self, rid: Rid, direction: Direction, labels: &[String]) -> Result<Vec<Rid>> {
        let inner = self.inner.read();
        let pick = |edges: Option<&Vec<(String, Rid)>>| -> Vec<Rid> {
            edges
                .map(|edges| {
                    edges
                        .iter()
                        .filter(|(label, _)| labels.is_empty() || labels.contains(label))
                        .map(|(_, rid)| *rid)
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(match direction {
            Direction::Out => pick(inner.out_edges.get(&rid)),
            Direction::In => pick(inner.in_edges.get(&rid)),
            Direction::Both => {
                let mut out = pick(inner.out_edges.get(&rid));
                out.extend(pick(inner.in_edges.get(&rid)));
                out
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(mut cursor: BoxIndexCursor) -> Result<Vec<(IndexKey, Rid)>> {
        let mut out = Vec::new();
        while let Some(entry) = cursor.next_entry()? {
            out.push(entry);
        }
        cursor.close();
        Ok(out)
    }

    #[test]
    fn composite_prefix_ranges() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("T", &[])?;
        let index = db.create_index(IndexDefinition::ordered("T.a_b", "T", &["a", "b"]))?;
        for (a, b) in [(1, 1), (1, 3), (1, 5), (2, 1)] {
            db.insert("T", [("a", a), ("b", b)])?;
        }
        let from = IndexKey::new([Value::Int(1), Value::Int(1)]);
        let to = IndexKey::single(1);
        let hits = drain(index.stream_entries_between(&from, false, &to, true, true)?)?;
        assert_eq!(hits.len(), 2);
        let all_ones = drain(index.stream_entries(&IndexKey::single(1), false)?)?;
        assert_eq!(all_ones.len(), 3);
        assert_eq!(all_ones[0].0, IndexKey::new([Value::Int(1), Value::Int(5)]));
        assert_eq!(index.cursors().open(), 0);
        assert_eq!(index.cursors().opened(), 2);
        Ok(())
    }

    #[test]
    fn null_bucket_respects_ignore_nulls() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("T", &[])?;
        let keeps = db.create_index(IndexDefinition::ordered("T.x", "T", &["x"]))?;
        let skips = db.create_index(
            IndexDefinition::ordered("T.x2", "T", &["x"]).ignoring_nulls(true),
        )?;
        db.insert("T", [("y", 1)])?;
        db.insert("T", [("x", 1)])?;
        assert_eq!(drain(keeps.get_rids(&IndexKey::null())?)?.len(), 1);
        assert_eq!(drain(skips.get_rids(&IndexKey::null())?)?.len(), 0);
        assert_eq!(drain(keeps.stream(true)?)?.len(), 1);
        Ok(())
    }

    #[test]
    fn partial_null_keys_fail_range_bounds() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("T", &[])?;
        let index = db.create_index(IndexDefinition::ordered("T.ab", "T", &["a", "b"]))?;
        db.insert("T", [("b", 1)])?;
        db.insert("T", [("a", 1), ("b", 1)])?;
        let upper = IndexKey::single(5);
        assert_eq!(drain(index.stream_entries_minor(&upper, true, true)?)?.len(), 1);
        let prefix = IndexKey::new([Value::Int(1), Value::Int(3)]);
        assert_eq!(drain(index.stream_entries_minor(&prefix, false, true)?)?.len(), 1);
        Ok(())
    }

    #[test]
    fn dropping_a_cursor_releases_it() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("T", &[])?;
        let index = db.create_index(IndexDefinition::ordered("T.x", "T", &["x"]))?;
        {
            let _cursor = index.stream(true)?;
            assert_eq!(index.cursors().open(), 1);
        }
        assert_eq!(index.cursors().open(), 0);
        Ok(())
    }

    #[test]
    fn full_text_matches_all_words() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("Doc", &[])?;
        let index = db.create_index(IndexDefinition::full_text("Doc.body", "Doc", "body"))?;
        let hit = db.insert("Doc", [("body", "The quick brown fox")])?;
        db.insert("Doc", [("body", "a quick turtle")])?;
        let rows = drain(index.stream_entries(&IndexKey::single("Quick fox"), true)?)?;
        assert_eq!(rows.iter().map(|(_, rid)| *rid).collect::<Vec<_>>(), vec![hit]);
        Ok(())
    }

    #[test]
    fn polymorphic_counts_and_neighbors() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_abstract_type("V", &[])?;
        db.create_type("Person", &["V"])?;
        let a = db.insert("Person", [("name", "a")])?;
        let b = db.insert("Person", [("name", "b")])?;
        db.add_edge(a, "knows", b)?;
        assert_eq!(db.count("V", true), 2);
        assert_eq!(db.count("V", false), 0);
        assert_eq!(db.neighbors(b, Direction::In, &[])?, vec![a]);
        assert!(db
            .neighbors(a, Direction::Out, &["likes".to_owned()])?
            .is_empty());
        assert!(db.is_subclass_of("Person", "V"));
        Ok(())
    }
}
