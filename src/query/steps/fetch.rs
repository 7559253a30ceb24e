use std::collections::BTreeSet;

use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::plan::ExplainProp;
use crate::query::steps::{drain_input, require_input, ExecutionStep};
use crate::query::stream::{self, BoxStream, TupleSource};
use crate::query::tuple::Tuple;
use crate::types::{ClusterId, Rid};

struct RidScan {
    rids: Box<dyn Iterator<Item = Rid> + Send>,
}

impl TupleSource for RidScan {
    fn produce(&mut self, _ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        Ok(self.rids.next().map(Tuple::bound))
    }
}

/// Streams every record of a list of clusters, one cluster after another.
fn scan_clusters(clusters: Vec<ClusterId>, ascending: bool) -> BoxStream {
    let mut pending = clusters.into_iter();
    stream::chain(move |ctx| {
        let Some(cluster) = pending.next() else {
            return Ok(None);
        };
        let rids = ctx.database().records().scan_cluster(cluster, ascending)?;
        Ok(Some(stream::from_source(RidScan { rids })))
    })
}

/// Full scan of a type and, polymorphically, its subtypes.
#[derive(Clone, Debug)]
pub struct FetchFromTypeStep {
    type_name: String,
    clusters: Vec<ClusterId>,
    ascending: bool,
}

impl FetchFromTypeStep {
    /// Scans the given clusters of `type_name`; callers resolve them from the schema.
    pub fn new(type_name: impl Into<String>, mut clusters: Vec<ClusterId>, ascending: bool) -> Self {
        clusters.sort_unstable();
        if !ascending {
            clusters.reverse();
        }
        Self {
            type_name: type_name.into(),
            clusters,
            ascending,
        }
    }

    /// Scanned type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl ExecutionStep for FetchFromTypeStep {
    fn name(&self) -> &'static str {
        "FETCH FROM TYPE"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        Ok(scan_clusters(self.clusters.clone(), self.ascending))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        vec![
            ExplainProp::plain("type", &self.type_name),
            ExplainProp::plain("clusters", format!("{:?}", self.clusters)),
            ExplainProp::plain("order", if self.ascending { "asc" } else { "desc" }),
        ]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

/// Scan of explicitly named clusters.
#[derive(Clone, Debug)]
pub struct FetchFromClustersStep {
    clusters: Vec<ClusterId>,
    ascending: bool,
}

impl FetchFromClustersStep {
    /// Scans `clusters` in the given order.
    pub fn new(clusters: Vec<ClusterId>, ascending: bool) -> Self {
        Self {
            clusters,
            ascending,
        }
    }
}

impl ExecutionStep for FetchFromClustersStep {
    fn name(&self) -> &'static str {
        "FETCH FROM CLUSTERS"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        Ok(scan_clusters(self.clusters.clone(), self.ascending))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("clusters", format!("{:?}", self.clusters))]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

struct RidLookup {
    rids: std::vec::IntoIter<Rid>,
}

impl TupleSource for RidLookup {
    fn produce(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        for rid in self.rids.by_ref() {
            if let Some(record) = ctx.database().records().load(rid)? {
                return Ok(Some(Tuple::from_record(record)));
            }
        }
        Ok(None)
    }
}

/// Loads an explicit list of record ids, skipping missing ones.
#[derive(Clone, Debug)]
pub struct FetchFromRidsStep {
    rids: Vec<Rid>,
}

impl FetchFromRidsStep {
    /// Loads `rids` in the given order.
    pub fn new(rids: Vec<Rid>) -> Self {
        Self { rids }
    }
}

impl ExecutionStep for FetchFromRidsStep {
    fn name(&self) -> &'static str {
        "FETCH FROM RIDS"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        Ok(stream::from_source(RidLookup {
            rids: self.rids.clone().into_iter(),
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        let rids: Vec<String> = self.rids.iter().map(Rid::to_string).collect();
        vec![ExplainProp::literal("rids", rids.join(", "))]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

/// Replays a snapshot of in-memory rows.
///
/// The snapshot is not reproducible from the statement, so plans holding
/// this step are never cached.
#[derive(Clone, Debug)]
pub struct FetchFromValuesStep {
    rows: Vec<Tuple>,
}

impl FetchFromValuesStep {
    /// Replays `rows`.
    pub fn new(rows: Vec<Tuple>) -> Self {
        Self { rows }
    }
}

impl ExecutionStep for FetchFromValuesStep {
    fn name(&self) -> &'static str {
        "FETCH FROM VALUES"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        Ok(stream::from_tuples(self.rows.clone()))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("rows", self.rows.len().to_string())]
    }

    fn can_be_cached(&self) -> bool {
        false
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

/// Keeps bound tuples whose record belongs to a type (or one of its subtypes)
/// or to one of the allowed clusters.
#[derive(Clone, Debug)]
pub struct FilterByTypeStep {
    type_name: Option<String>,
    clusters: Option<BTreeSet<ClusterId>>,
}

impl FilterByTypeStep {
    /// Keeps records of `type_name`, polymorphically.
    pub fn by_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            clusters: None,
        }
    }

    /// Keeps records stored in `clusters`.
    pub fn by_clusters(clusters: impl IntoIterator<Item = ClusterId>) -> Self {
        Self {
            type_name: None,
            clusters: Some(clusters.into_iter().collect()),
        }
    }
}

impl ExecutionStep for FilterByTypeStep {
    fn name(&self) -> &'static str {
        "FILTER ITEMS BY TYPE"
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        let type_name = self.type_name.clone();
        let clusters = self.clusters.clone();
        Ok(stream::filter_map(upstream, move |tuple, ctx| {
            let Some(rid) = tuple.rid() else {
                return Err(QuarryError::Invalid(format!(
                    "cannot filter projected row {tuple} by type"
                )));
            };
            if let Some(clusters) = &clusters {
                if !clusters.contains(&rid.cluster) {
                    return Ok(None);
                }
            }
            if let Some(type_name) = &type_name {
                let Some(actual) = tuple.type_name(ctx)? else {
                    return Ok(None);
                };
                if !ctx.database().schema().is_subclass_of(&actual, type_name) {
                    return Ok(None);
                }
            }
            Ok(Some(tuple))
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        let mut props = Vec::new();
        if let Some(type_name) = &self.type_name {
            props.push(ExplainProp::plain("type", type_name));
        }
        if let Some(clusters) = &self.clusters {
            props.push(ExplainProp::plain("clusters", format!("{clusters:?}")));
        }
        props
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::ExecutionPlan;
    use crate::storage::{MemoryDatabase, Schema};

    #[test]
    fn type_scan_covers_subtypes_in_cluster_order() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("V", &[])?;
        db.create_type("Person", &["V"])?;
        let v = db.insert("V", [("n", 1)])?;
        let p = db.insert("Person", [("n", 2)])?;
        let mut ctx = ExecutionContext::new(db.database());
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromTypeStep::new("V", db.polymorphic_clusters("V"), false));
        let rids: Vec<_> = plan
            .execute(&mut ctx)?
            .map(|t| t.map(|t| t.rid()))
            .collect::<Result<_>>()?;
        assert_eq!(rids, vec![Some(p), Some(v)]);
        Ok(())
    }

    #[test]
    fn rid_fetch_skips_missing_and_filters_by_type() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("A", &[])?;
        db.create_type("B", &[])?;
        let a = db.insert("A", [("n", 1)])?;
        let b = db.insert("B", [("n", 2)])?;
        let mut ctx = ExecutionContext::new(db.database());
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromRidsStep::new(vec![a, Rid::new(40, 0), b]));
        plan.chain(FilterByTypeStep::by_type("B"));
        let rows = plan.execute(&mut ctx)?.into_vec()?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rid(), Some(b));
        Ok(())
    }
}
