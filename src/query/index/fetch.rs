//! Steps reading index entries.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::index::descriptor::{IndexSearchDescriptor, KeyRange};
use crate::query::index::selector::is_equality_lookup;
use crate::query::plan::ExplainProp;
use crate::query::steps::{drain_input, require_input, ExecutionStep};
use crate::query::stream::{self, BoxStream, TupleSource};
use crate::query::tuple::Tuple;
use crate::query::value::Value;
use crate::storage::{BoxIndexCursor, Index, IndexKey};
use crate::types::{ClusterId, Rid};

/// Wraps one index cursor; every entry becomes a `{key, rid}` tuple.
struct EntryScan {
    cursor: Option<BoxIndexCursor>,
    observed: Arc<AtomicU64>,
}

fn key_value(key: IndexKey) -> Value {
    let mut parts = key.components().to_vec();
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        Value::List(parts)
    }
}

impl TupleSource for EntryScan {
    fn produce(&mut self, _ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        let Some((key, rid)) = cursor.next_entry()? else {
            return Ok(None);
        };
        self.observed.fetch_add(1, Ordering::Relaxed);
        Ok(Some(Tuple::from_pairs([
            ("key", key_value(key)),
            ("rid", Value::Rid(rid)),
        ])))
    }

    fn release(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
    }
}

/// One pending scan of a [`FetchFromIndexStep`].
#[derive(Clone, Debug)]
enum Scan {
    Nulls,
    All,
    Range(KeyRange),
}

fn open(index: &dyn Index, scan: &Scan, ascending: bool, equality: bool) -> Result<BoxIndexCursor> {
    let definition = index.definition();
    match scan {
        Scan::Nulls => index.get_rids(&IndexKey::null()),
        Scan::All => index.stream(ascending),
        Scan::Range(range) if range.is_null_scan() => index.get_rids(&IndexKey::null()),
        Scan::Range(range) if definition.is_full_text() => index.stream_entries(&range.from, ascending),
        Scan::Range(range) if !definition.supports_ordered_iteration() => {
            if equality && range.is_point() {
                index.stream_entries(&range.from, ascending)
            } else {
                Err(QuarryError::UnsupportedCondition(format!(
                    "index {} only answers full-key equality, got {range}",
                    index.name()
                )))
            }
        }
        Scan::Range(range) => match (range.from.is_empty(), range.to.is_empty()) {
            (true, true) => index.stream(ascending),
            (true, false) => index.stream_entries_minor(&range.to, range.to_inclusive, ascending),
            (false, true) => {
                index.stream_entries_major(&range.from, range.from_inclusive, ascending)
            }
            (false, false) => index.stream_entries_between(
                &range.from,
                range.from_inclusive,
                &range.to,
                range.to_inclusive,
                ascending,
            ),
        },
    }
}

/// Streams `{key, rid}` entries of an index lookup.
///
/// Multi-valued operands become one scan per key range, opened lazily and
/// closed before the next one opens. On ordered indexes the ranges run in
/// scan direction, so the output stays in key order. Flat iteration adds the
/// null-key bucket unless the index ignores nulls. The number of entries read is pushed to
/// the statistics store when the stream closes.
#[derive(Clone, Debug)]
pub struct FetchFromIndexStep {
    desc: IndexSearchDescriptor,
    ascending: bool,
}

impl FetchFromIndexStep {
    /// Scans `desc` in the given key order.
    pub fn new(desc: IndexSearchDescriptor, ascending: bool) -> Self {
        Self { desc, ascending }
    }

    /// The planned lookup.
    pub fn descriptor(&self) -> &IndexSearchDescriptor {
        &self.desc
    }

    fn scans(&self, ctx: &ExecutionContext) -> Result<Vec<Scan>> {
        if self.desc.is_flat() {
            let with_nulls = !self.desc.index().definition().ignore_nulls;
            return Ok(match (with_nulls, self.ascending) {
                (false, _) => vec![Scan::All],
                (true, true) => vec![Scan::Nulls, Scan::All],
                (true, false) => vec![Scan::All, Scan::Nulls],
            });
        }
        let mut ranges = self.desc.key_ranges(ctx)?;
        if self.desc.index().definition().supports_ordered_iteration() {
            ranges.sort_by(|a, b| a.from.cmp(&b.from));
            if !self.ascending {
                ranges.reverse();
            }
        }
        Ok(ranges.into_iter().map(Scan::Range).collect())
    }
}

impl ExecutionStep for FetchFromIndexStep {
    fn name(&self) -> &'static str {
        "FETCH FROM INDEX"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        let scans = self.scans(ctx)?;
        debug!(
            index = self.desc.index().name(),
            scans = scans.len(),
            ascending = self.ascending,
            "index.fetch_started"
        );
        let index = Arc::clone(self.desc.index());
        let ascending = self.ascending;
        let equality = is_equality_lookup(&self.desc);
        let observed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&observed);
        let mut pending = scans.into_iter();
        let entries = stream::chain(move |_ctx| {
            let Some(scan) = pending.next() else {
                return Ok(None);
            };
            let cursor = open(index.as_ref(), &scan, ascending, equality)?;
            Ok(Some(stream::from_source(EntryScan {
                cursor: Some(cursor),
                observed: Arc::clone(&counter),
            })))
        });
        let stats = Arc::clone(ctx.database().stats());
        let stat_key = self.desc.stat_key();
        Ok(stream::on_close(entries, move || {
            let count = observed.load(Ordering::Relaxed);
            debug!(index = %stat_key.index, count, "index.fetch_closed");
            stats.push_index_stat(stat_key.clone(), count);
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        let mut props = vec![ExplainProp::plain("index", self.desc.index().name())];
        if !self.desc.is_flat() {
            let keys: Vec<String> = self
                .desc
                .key_conditions()
                .iter()
                .map(ToString::to_string)
                .collect();
            props.push(ExplainProp::literal("key", keys.join(" AND ")));
        }
        if let Some(range) = self.desc.additional_range() {
            props.push(ExplainProp::literal("additional_range", range.to_string()));
        }
        props.push(ExplainProp::plain("order", if self.ascending { "asc" } else { "desc" }));
        props
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

/// Turns `{key, rid}` index entries into tuples bound to the indexed records,
/// keeping only records stored in the allowed clusters.
#[derive(Clone, Debug)]
pub struct GetValueFromIndexEntryStep {
    clusters: Option<BTreeSet<ClusterId>>,
}

impl GetValueFromIndexEntryStep {
    /// Keeps entries pointing into `clusters`; `None` keeps all.
    pub fn new(clusters: Option<impl IntoIterator<Item = ClusterId>>) -> Self {
        Self {
            clusters: clusters.map(|c| c.into_iter().collect()),
        }
    }
}

impl ExecutionStep for GetValueFromIndexEntryStep {
    fn name(&self) -> &'static str {
        "GET VALUES FROM INDEX ENTRIES"
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        let clusters = self.clusters.clone();
        Ok(stream::filter_map(upstream, move |entry, _ctx| {
            let rid: Rid = entry
                .get("rid")
                .and_then(Value::as_rid)
                .ok_or_else(|| QuarryError::internal(format!("index entry without rid: {entry}")))?;
            if clusters.as_ref().is_some_and(|allowed| !allowed.contains(&rid.cluster)) {
                return Ok(None);
            }
            Ok(Some(Tuple::bound(rid)))
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        match &self.clusters {
            Some(clusters) => vec![ExplainProp::plain("clusters", format!("{clusters:?}"))],
            None => Vec::new(),
        }
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::Condition;
    use crate::query::plan::ExecutionPlan;
    use crate::storage::{IndexDefinition, IndexStatKey, MemoryDatabase, StatsStore};

    #[test]
    fn in_list_scans_each_key_and_releases_cursors() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("T", &[])?;
        let index = db.create_index(IndexDefinition::ordered("t_x", "T", &["x"]))?;
        for x in 0..6 {
            db.insert("T", [("x", x)])?;
        }
        let mut ctx = ExecutionContext::new(db.database());
        let desc = IndexSearchDescriptor::new(
            index.clone(),
            vec![Condition::in_list("x", [1, 2, 3])],
            None,
            Condition::True,
        );
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromIndexStep::new(desc, true));
        plan.chain(GetValueFromIndexEntryStep::new(None::<Vec<ClusterId>>));
        assert_eq!(plan.execute(&mut ctx)?.count(), 3);
        assert_eq!(index.cursors().opened(), 3);
        assert_eq!(index.cursors().open(), 0);
        assert_eq!(
            db.stats().index_stat(&IndexStatKey::new("t_x", 1, false, false)),
            Some(3)
        );
        Ok(())
    }

    #[test]
    fn flat_iteration_includes_null_keys_in_order() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("T", &[])?;
        let index = db.create_index(IndexDefinition::ordered("t_x", "T", &["x"]))?;
        db.insert("T", [("x", 2)])?;
        let missing = db.insert("T", [("y", 1)])?;
        db.insert("T", [("x", 1)])?;
        let mut ctx = ExecutionContext::new(db.database());
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromIndexStep::new(IndexSearchDescriptor::flat(index.clone()), false));
        let rows = plan.execute(&mut ctx)?.into_vec()?;
        let keys: Vec<Value> = rows.iter().filter_map(|r| r.get("key").cloned()).collect();
        assert_eq!(keys, vec![Value::Int(2), Value::Int(1), Value::Null]);
        assert_eq!(rows[2].get("rid"), Some(&Value::Rid(missing)));
        Ok(())
    }

    #[test]
    fn hash_index_rejects_ranges_at_run_time() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("T", &[])?;
        let index = db.create_index(IndexDefinition::hash("t_x", "T", &["x"]))?;
        let mut ctx = ExecutionContext::new(db.database());
        let desc = IndexSearchDescriptor::new(index, vec![Condition::gt("x", 1)], None, Condition::True);
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromIndexStep::new(desc, true));
        let err = plan.execute(&mut ctx)?.into_vec().unwrap_err();
        assert_eq!(err.code(), "UnsupportedCondition");
        Ok(())
    }

    #[test]
    fn closing_before_reading_releases_everything() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("T", &[])?;
        let index = db.create_index(IndexDefinition::ordered("t_x", "T", &["x"]))?;
        db.insert("T", [("x", 1)])?;
        let mut ctx = ExecutionContext::new(db.database());
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromIndexStep::new(
            IndexSearchDescriptor::new(index.clone(), vec![Condition::eq("x", 1)], None, Condition::True),
            true,
        ));
        let mut stream = plan.start(&mut ctx)?;
        assert!(stream.has_next(&mut ctx)?);
        stream.close();
        assert_eq!(index.cursors().open(), 0);
        Ok(())
    }
}
