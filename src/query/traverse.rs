//! Depth-first and breadth-first graph walks.
//!
//! The walker owns a frontier of pending entries and a visited set of record
//! ids. Seeds are pulled from upstream in batches; each popped entry is
//! emitted, then expanded through the configured projections. Every record
//! is admitted at most once, whether or not the while-condition accepts it.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tracing::trace;

use crate::error::Result;
use crate::query::ast::{TraverseProjection, TraverseStatement, TraverseStrategy};
use crate::query::context::ExecutionContext;
use crate::query::expr::Condition;
use crate::query::plan::{ExecutionPlan, ExplainProp};
use crate::query::planner::{chain_timeout, SelectPlanner};
use crate::query::steps::{require_input, ExecutionStep, LimitStep};
use crate::query::stream::{self, BoxStream, TupleSource};
use crate::query::tuple::Tuple;
use crate::query::value::Value;
use crate::types::Rid;

fn rid_list(rids: &[Rid]) -> Value {
    Value::List(rids.iter().copied().map(Value::Rid).collect())
}

/// Pushes every traversable element of `value` onto `out`.
fn flatten_targets(value: Value, out: &mut Vec<Tuple>) {
    match value {
        Value::Rid(rid) => out.push(Tuple::bound(rid)),
        Value::Tuple(tuple) => out.push(*tuple),
        Value::List(items) => items.into_iter().for_each(|item| flatten_targets(item, out)),
        Value::Map(map) => map.into_values().for_each(|item| flatten_targets(item, out)),
        _ => {}
    }
}

#[derive(Clone, Debug)]
struct WalkSpec {
    projections: Vec<TraverseProjection>,
    while_condition: Option<Condition>,
    max_depth: Option<usize>,
    strategy: TraverseStrategy,
}

struct Walker {
    upstream: Option<BoxStream>,
    spec: WalkSpec,
    batch_size: usize,
    frontier: VecDeque<Tuple>,
    visited: FxHashSet<Rid>,
}

impl Walker {
    /// Marks the entry visited and decides whether it joins the frontier.
    fn admit(&mut self, entry: &Tuple, ctx: &ExecutionContext) -> Result<bool> {
        if let Some(rid) = entry.rid() {
            if !self.visited.insert(rid) {
                return Ok(false);
            }
        }
        match &self.spec.while_condition {
            Some(condition) => condition.matches(entry, ctx),
            None => Ok(true),
        }
    }

    fn refill(&mut self, ctx: &mut ExecutionContext) -> Result<()> {
        let Some(upstream) = self.upstream.as_mut() else {
            return Ok(());
        };
        let mut seeds = Vec::with_capacity(self.batch_size);
        while seeds.len() < self.batch_size {
            match upstream.try_next(ctx)? {
                Some(seed) => seeds.push(seed),
                None => {
                    upstream.close();
                    self.upstream = None;
                    break;
                }
            }
        }
        for seed in seeds {
            let path: Vec<Rid> = seed.rid().into_iter().collect();
            let entry = seed
                .with_metadata("$depth", 0)
                .with_metadata("$path", rid_list(&path))
                .with_metadata("$stack", rid_list(&path));
            if self.admit(&entry, ctx)? {
                self.frontier.push_back(entry);
            }
        }
        Ok(())
    }

    fn children(&self, entry: &Tuple, ctx: &ExecutionContext) -> Result<Vec<Tuple>> {
        let mut out = Vec::new();
        for projection in &self.spec.projections {
            match projection {
                TraverseProjection::Edges(direction, labels) => {
                    if let Some(rid) = entry.rid() {
                        let neighbors = ctx.database().records().neighbors(rid, *direction, labels)?;
                        out.extend(neighbors.into_iter().map(Tuple::bound));
                    }
                }
                TraverseProjection::Expr(expr) => flatten_targets(expr.eval(entry, ctx)?, &mut out),
            }
        }
        Ok(out)
    }

    fn expand(&mut self, entry: &Tuple, ctx: &ExecutionContext) -> Result<()> {
        let depth = entry.depth().unwrap_or(0);
        if self
            .spec
            .max_depth
            .is_some_and(|max| depth >= i64::try_from(max).unwrap_or(i64::MAX))
        {
            return Ok(());
        }
        let path = entry.path();
        let stack = match entry.metadata("$stack") {
            Some(Value::List(items)) => items.iter().filter_map(Value::as_rid).collect(),
            _ => Vec::new(),
        };
        let mut admitted = Vec::new();
        for child in self.children(entry, ctx)? {
            let mut child_path = path.clone();
            let mut child_stack: Vec<Rid> = Vec::with_capacity(stack.len() + 1);
            if let Some(rid) = child.rid() {
                child_path.push(rid);
                child_stack.push(rid);
            }
            child_stack.extend(stack.iter().copied());
            let child = child
                .with_metadata("$depth", depth + 1)
                .with_metadata("$path", rid_list(&child_path))
                .with_metadata("$stack", rid_list(&child_stack));
            if self.admit(&child, ctx)? {
                admitted.push(child);
            }
        }
        match self.spec.strategy {
            TraverseStrategy::DepthFirst => {
                for child in admitted.into_iter().rev() {
                    self.frontier.push_front(child);
                }
            }
            TraverseStrategy::BreadthFirst => self.frontier.extend(admitted),
        }
        Ok(())
    }
}

impl TupleSource for Walker {
    fn produce(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        if self.frontier.is_empty() {
            self.refill(ctx)?;
        }
        let Some(entry) = self.frontier.pop_front() else {
            return Ok(None);
        };
        self.expand(&entry, ctx)?;
        Ok(Some(entry))
    }

    fn release(&mut self) {
        if let Some(mut upstream) = self.upstream.take() {
            upstream.close();
        }
        self.frontier.clear();
        trace!(visited = self.visited.len(), "traverse.closed");
    }
}

/// Walks the graph from the upstream seed records.
///
/// Each emitted tuple carries `$depth`, `$path` (record ids from the seed)
/// and `$stack` (the same ids, newest first) as metadata.
#[derive(Clone, Debug)]
pub struct TraverseStep {
    spec: WalkSpec,
}

impl TraverseStep {
    /// Depth-first walk following `projections`.
    pub fn depth_first(projections: Vec<TraverseProjection>) -> Self {
        Self::with_strategy(projections, TraverseStrategy::DepthFirst)
    }

    /// Breadth-first walk following `projections`.
    pub fn breadth_first(projections: Vec<TraverseProjection>) -> Self {
        Self::with_strategy(projections, TraverseStrategy::BreadthFirst)
    }

    fn with_strategy(projections: Vec<TraverseProjection>, strategy: TraverseStrategy) -> Self {
        Self {
            spec: WalkSpec {
                projections,
                while_condition: None,
                max_depth: None,
                strategy,
            },
        }
    }

    /// Only records matching `condition` are emitted and expanded.
    pub fn with_while(mut self, condition: Condition) -> Self {
        self.spec.while_condition = Some(condition);
        self
    }

    /// Records at `depth` are emitted but not expanded.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.spec.max_depth = Some(depth);
        self
    }
}

impl ExecutionStep for TraverseStep {
    fn name(&self) -> &'static str {
        match self.spec.strategy {
            TraverseStrategy::DepthFirst => "DEPTH-FIRST TRAVERSE",
            TraverseStrategy::BreadthFirst => "BREADTH-FIRST TRAVERSE",
        }
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        Ok(stream::from_source(Walker {
            upstream: Some(upstream),
            spec: self.spec.clone(),
            batch_size: ctx.config().traverse_batch_size.max(1),
            frontier: VecDeque::new(),
            visited: FxHashSet::default(),
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        let projections: Vec<String> = self.spec.projections.iter().map(ToString::to_string).collect();
        let mut props = vec![ExplainProp::plain("projections", projections.join(", "))];
        if let Some(condition) = &self.spec.while_condition {
            props.push(ExplainProp::literal("while", condition.to_string()));
        }
        if let Some(depth) = self.spec.max_depth {
            props.push(ExplainProp::plain("max_depth", depth.to_string()));
        }
        props
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

/// Plans TRAVERSE statements: seed fetch, walk, limit, timeout.
#[derive(Debug, Default)]
pub struct TraversePlanner;

impl TraversePlanner {
    /// Builds the plan of `statement`.
    pub fn create_plan(statement: &TraverseStatement, ctx: &ExecutionContext) -> Result<ExecutionPlan> {
        let mut plan = SelectPlanner::target_plan(&statement.target, ctx)?;
        let mut walk = TraverseStep::with_strategy(statement.projections.clone(), statement.strategy);
        if let Some(condition) = &statement.while_condition {
            walk = walk.with_while(condition.clone());
        }
        if let Some(depth) = statement.max_depth {
            walk = walk.with_max_depth(depth);
        }
        plan.chain(walk);
        if let Some(limit) = statement.limit {
            plan.chain(LimitStep::new(limit));
        }
        chain_timeout(&mut plan, None, ctx);
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::Expr;
    use crate::query::steps::FetchFromRidsStep;
    use crate::storage::MemoryDatabase;

    #[test]
    fn depth_first_goes_deep_before_wide() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("V", &[])?;
        let root = db.insert("V", [("n", "root")])?;
        let a = db.insert("V", [("n", "a")])?;
        let b = db.insert("V", [("n", "b")])?;
        let a1 = db.insert("V", [("n", "a1")])?;
        db.add_edge(root, "e", a)?;
        db.add_edge(root, "e", b)?;
        db.add_edge(a, "e", a1)?;
        let mut ctx = ExecutionContext::new(db.database());
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromRidsStep::new(vec![root]));
        plan.chain(TraverseStep::depth_first(vec![TraverseProjection::out(["e"])]));
        let rows = plan.execute(&mut ctx)?.into_vec()?;
        let order: Vec<_> = rows.iter().filter_map(Tuple::rid).collect();
        assert_eq!(order, vec![root, a, a1, b]);
        assert_eq!(rows[2].path(), vec![root, a, a1]);
        assert_eq!(
            rows[2].metadata("$stack"),
            Some(&Value::List(vec![Value::Rid(a1), Value::Rid(a), Value::Rid(root)]))
        );
        Ok(())
    }

    #[test]
    fn while_condition_blocks_but_still_marks_visited() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("V", &[])?;
        let root = db.insert("V", [("ok", true)])?;
        let blocked = db.insert("V", [("ok", false)])?;
        db.add_edge(root, "e", blocked)?;
        db.add_edge(blocked, "e", root)?;
        let mut ctx = ExecutionContext::new(db.database());
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromRidsStep::new(vec![root, blocked]));
        plan.chain(
            TraverseStep::breadth_first(vec![TraverseProjection::out(["e"])])
                .with_while(Condition::eq("ok", true)),
        );
        let rows = plan.execute(&mut ctx)?.into_vec()?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rid(), Some(root));
        Ok(())
    }

    #[test]
    fn link_expressions_are_followed() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("Doc", &[])?;
        let leaf = db.insert("Doc", [("n", Value::Int(2))])?;
        let mid = db.insert("Doc", [("children", Value::List(vec![Value::Rid(leaf)]))])?;
        let top = db.insert("Doc", [("parent", Value::Null), ("children", Value::Rid(mid))])?;
        let mut ctx = ExecutionContext::new(db.database());
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromRidsStep::new(vec![top]));
        plan.chain(
            TraverseStep::breadth_first(vec![TraverseProjection::Expr(Expr::prop("children"))])
                .with_max_depth(1),
        );
        let rows = plan.execute(&mut ctx)?.into_vec()?;
        let depths: Vec<_> = rows.iter().map(|r| (r.rid(), r.depth())).collect();
        assert_eq!(depths, vec![(Some(top), Some(0)), (Some(mid), Some(1))]);
        Ok(())
    }
}
