//! Steps executing a scheduled pattern.
//!
//! Rows flowing through a pattern plan are projected tuples mapping each
//! bound alias to a `Value::Rid`, or to `Value::Null` when an optional node
//! did not match.

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::FxHashSet;
use tracing::trace;

use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::expr::Condition;
use crate::query::pattern::model::EdgeMethod;
use crate::query::pattern::scheduler::EdgeTraversal;
use crate::query::plan::{ExecutionPlan, ExplainProp};
use crate::query::steps::{drain_input, require_input, ExecutionStep};
use crate::query::stream::{self, BoxStream, TupleSource};
use crate::query::tuple::Tuple;
use crate::query::value::Value;
use crate::types::{ClusterId, Rid};

/// Prefix of aliases generated for unnamed pattern nodes.
pub const DEFAULT_ALIAS_PREFIX: &str = "$QUARRY_DEFAULT_ALIAS_";

/// Merged constraints of one pattern alias.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AliasConstraints {
    /// Required type, polymorphically.
    pub type_name: Option<String>,
    /// Required cluster.
    pub cluster: Option<ClusterId>,
    /// Required record.
    pub rid: Option<Rid>,
    /// Filter evaluated with `$matched` set to the partial row.
    pub filter: Option<Condition>,
    /// The alias may stay unmatched.
    pub optional: bool,
}

impl AliasConstraints {
    /// Aliases read through `$matched` by the filter.
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.filter
            .as_ref()
            .map(Condition::matched_aliases)
            .unwrap_or_default()
    }

    /// Returns true if record `rid` may bind the alias in `row`.
    pub fn accepts(&self, rid: Rid, row: &Tuple, ctx: &mut ExecutionContext) -> Result<bool> {
        if self.rid.is_some_and(|expected| expected != rid) {
            return Ok(false);
        }
        if self.cluster.is_some_and(|cluster| cluster != rid.cluster) {
            return Ok(false);
        }
        let candidate = Tuple::bound(rid);
        if let Some(type_name) = &self.type_name {
            let Some(actual) = candidate.type_name(ctx)? else {
                return Ok(false);
            };
            if !ctx.database().schema().is_subclass_of(&actual, type_name) {
                return Ok(false);
            }
        }
        match &self.filter {
            Some(filter) => with_matched(ctx, row, |ctx| filter.matches(&candidate, ctx)),
            None => Ok(true),
        }
    }
}

/// Runs `f` with `$matched` bound to `row`, restoring the previous binding.
pub(crate) fn with_matched<T>(
    ctx: &mut ExecutionContext,
    row: &Tuple,
    f: impl FnOnce(&mut ExecutionContext) -> Result<T>,
) -> Result<T> {
    let previous = ctx.set_matched(Some(row.clone()));
    let result = f(ctx);
    ctx.set_matched(previous);
    result
}

fn bind(row: &Tuple, alias: &str, value: Value) -> Result<Tuple> {
    let mut out = row.clone();
    out.set_property(alias.to_owned(), value)?;
    Ok(out)
}

fn single_binding(alias: &str, rid: Rid) -> Tuple {
    Tuple::from_pairs([(alias.to_owned(), Value::Rid(rid))])
}

/// Runs the select plan of an alias once and keeps its rows in the context.
#[derive(Debug)]
pub struct MatchPrefetchStep {
    alias: String,
    plan: ExecutionPlan,
}

impl MatchPrefetchStep {
    /// Prefetches `alias` by running `plan`.
    pub fn new(alias: impl Into<String>, plan: ExecutionPlan) -> Self {
        Self {
            alias: alias.into(),
            plan,
        }
    }
}

impl ExecutionStep for MatchPrefetchStep {
    fn name(&self) -> &'static str {
        "PREFETCH"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        let rows = stream::collect(self.plan.copy().start(ctx)?, ctx)?;
        trace!(alias = %self.alias, rows = rows.len(), "pattern.prefetched");
        ctx.set_prefetched(self.alias.clone(), rows);
        Ok(stream::empty())
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("alias", &self.alias)]
    }

    fn sub_plans(&self) -> Vec<&ExecutionPlan> {
        vec![&self.plan]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(Self::new(self.alias.clone(), self.plan.copy()))
    }
}

/// Binds the first alias of a schedule, from prefetched rows when available.
#[derive(Debug)]
pub struct MatchFirstStep {
    alias: String,
    plan: ExecutionPlan,
}

impl MatchFirstStep {
    /// Binds `alias` to each record of `plan`.
    pub fn new(alias: impl Into<String>, plan: ExecutionPlan) -> Self {
        Self {
            alias: alias.into(),
            plan,
        }
    }

    /// Alias bound by this step.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

impl ExecutionStep for MatchFirstStep {
    fn name(&self) -> &'static str {
        "SET"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        let source = match ctx.prefetched(&self.alias) {
            Some(rows) => stream::from_tuples(rows.iter().cloned().collect::<Vec<_>>()),
            None => self.plan.copy().start(ctx)?,
        };
        let alias = self.alias.clone();
        Ok(stream::filter_map(source, move |tuple, _ctx| {
            Ok(tuple.rid().map(|rid| single_binding(&alias, rid)))
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("alias", &self.alias)]
    }

    fn sub_plans(&self) -> Vec<&ExecutionPlan> {
        vec![&self.plan]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(Self::new(self.alias.clone(), self.plan.copy()))
    }
}

/// Everything a pattern expansion needs, shared by the step and its stream.
#[derive(Clone, Debug)]
struct Expansion {
    traversal: EdgeTraversal,
    method: EdgeMethod,
    target: AliasConstraints,
    source_plan: Option<ExecutionPlan>,
}

impl Expansion {
    fn source(&self) -> &str {
        self.traversal.source()
    }

    fn target(&self) -> &str {
        self.traversal.target()
    }

    fn optional(&self) -> bool {
        self.target.optional
    }

    /// Source records for `row`: the bound value, or the source plan's records
    /// when the alias is not bound yet.
    fn sources(&self, row: &Tuple, ctx: &mut ExecutionContext) -> Result<Vec<(Tuple, Option<Rid>)>> {
        let Some(plan) = &self.source_plan else {
            let rid = row.get(self.source()).and_then(Value::as_rid);
            return Ok(vec![(row.clone(), rid)]);
        };
        if let Some(bound) = row.get(self.source()) {
            return Ok(vec![(row.clone(), bound.as_rid())]);
        }
        let candidates = with_matched(ctx, row, |ctx| {
            let stream = plan.copy().start(ctx)?;
            stream::collect(stream, ctx)
        })?;
        candidates
            .iter()
            .filter_map(Tuple::rid)
            .map(|rid| Ok((bind(row, self.source(), Value::Rid(rid))?, Some(rid))))
            .collect()
    }

    /// Records reachable over the edge, in discovery order.
    fn reachable(&self, from: Rid, row: &Tuple, ctx: &mut ExecutionContext) -> Result<Vec<Rid>> {
        let edge = &self.traversal.edge;
        if !edge.is_multi_hop() {
            return self.method.expand(from, ctx);
        }
        let mut out = Vec::new();
        let mut visited = FxHashSet::default();
        let mut frontier = VecDeque::from([(from, 0usize)]);
        while let Some((rid, depth)) = frontier.pop_front() {
            if !visited.insert(rid) {
                continue;
            }
            out.push(rid);
            if edge.max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            if let Some(condition) = &edge.while_condition {
                let depth = i64::try_from(depth).unwrap_or(i64::MAX);
                let node = Tuple::bound(rid).with_metadata("$depth", depth);
                if !with_matched(ctx, row, |ctx| condition.matches(&node, ctx))? {
                    continue;
                }
            }
            for next in self.method.expand(rid, ctx)? {
                if !visited.contains(&next) {
                    frontier.push_back((next, depth + 1));
                }
            }
        }
        Ok(out)
    }

    fn expand_row(&self, row: Tuple, ctx: &mut ExecutionContext) -> Result<VecDeque<Tuple>> {
        let mut out = VecDeque::new();
        let prior = row.get(self.target()).cloned();
        for (row, source) in self.sources(&row, ctx)? {
            let Some(source) = source else {
                if self.optional() {
                    out.push_back(self.unmatched(row, prior.as_ref())?);
                }
                continue;
            };
            let before = out.len();
            for candidate in self.reachable(source, &row, ctx)? {
                if let Some(expected) = prior.as_ref() {
                    if expected.as_rid() != Some(candidate) {
                        continue;
                    }
                }
                if !self.target.accepts(candidate, &row, ctx)? {
                    continue;
                }
                out.push_back(if prior.is_some() {
                    row.clone()
                } else {
                    bind(&row, self.target(), Value::Rid(candidate))?
                });
            }
            if out.len() == before && self.optional() {
                out.push_back(self.unmatched(row, prior.as_ref())?);
            }
        }
        Ok(out)
    }

    fn unmatched(&self, row: Tuple, prior: Option<&Value>) -> Result<Tuple> {
        match prior {
            Some(_) => Ok(row),
            None => bind(&row, self.target(), Value::Null),
        }
    }
}

struct Expander {
    upstream: BoxStream,
    expansion: Expansion,
    pending: VecDeque<Tuple>,
}

impl TupleSource for Expander {
    fn produce(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some(row) = self.upstream.try_next(ctx)? else {
                return Ok(None);
            };
            self.pending = self.expansion.expand_row(row, ctx)?;
        }
    }

    fn release(&mut self) {
        self.upstream.close();
        self.pending.clear();
    }
}

/// Expands one scheduled edge for every upstream row.
///
/// When the target alias is already bound, the expansion only checks that
/// the bound record is reachable. Optional targets keep rows without a match
/// and bind the alias to null.
#[derive(Debug)]
pub struct MatchStep {
    expansion: Expansion,
}

impl MatchStep {
    /// Expands `traversal`, binding records that satisfy `target`.
    ///
    /// `source_plan` selects candidates for the source alias when no earlier
    /// step bound it.
    pub fn new(
        traversal: EdgeTraversal,
        target: AliasConstraints,
        source_plan: Option<ExecutionPlan>,
    ) -> Result<Self> {
        let method = traversal.method()?;
        Ok(Self {
            expansion: Expansion {
                traversal,
                method,
                target,
                source_plan,
            },
        })
    }

    /// The scheduled edge.
    pub fn traversal(&self) -> &EdgeTraversal {
        &self.expansion.traversal
    }
}

impl ExecutionStep for MatchStep {
    fn name(&self) -> &'static str {
        if self.expansion.optional() {
            "OPTIONAL MATCH"
        } else {
            "MATCH"
        }
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        Ok(stream::from_source(Expander {
            upstream,
            expansion: self.expansion.clone(),
            pending: VecDeque::new(),
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        let edge = &self.expansion.traversal.edge;
        let mut props = vec![ExplainProp::literal(
            "edge",
            format!(
                "{{{}}}.{}{{{}}}",
                self.expansion.source(),
                self.expansion.method,
                self.expansion.target()
            ),
        )];
        if let Some(condition) = &edge.while_condition {
            props.push(ExplainProp::literal("while", condition.to_string()));
        }
        if let Some(depth) = edge.max_depth {
            props.push(ExplainProp::plain("max_depth", depth.to_string()));
        }
        props
    }

    fn sub_plans(&self) -> Vec<&ExecutionPlan> {
        self.expansion.source_plan.iter().collect()
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(Self {
            expansion: self.expansion.clone(),
        })
    }
}

/// Drops rows for which a NOT sub-pattern matches.
#[derive(Debug)]
pub struct FilterNotMatchPatternStep {
    plan: ExecutionPlan,
}

impl FilterNotMatchPatternStep {
    /// `plan` expands the NOT expression starting from each row.
    pub fn new(plan: ExecutionPlan) -> Self {
        Self { plan }
    }
}

impl ExecutionStep for FilterNotMatchPatternStep {
    fn name(&self) -> &'static str {
        "NOT"
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        let plan = self.plan.copy();
        Ok(stream::filter_map(upstream, move |row, ctx| {
            let mut candidate = plan
                .copy()
                .start_from(Some(stream::from_tuples([row.clone()])), ctx)?;
            let matched = candidate.has_next(ctx);
            candidate.close();
            Ok((!matched?).then_some(row))
        }))
    }

    fn sub_plans(&self) -> Vec<&ExecutionPlan> {
        vec![&self.plan]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(Self::new(self.plan.copy()))
    }
}

/// `RETURN $patterns`: removes generated aliases from each row.
#[derive(Clone, Debug, Default)]
pub struct ReturnMatchPatternsStep;

impl ExecutionStep for ReturnMatchPatternsStep {
    fn name(&self) -> &'static str {
        "RETURN $patterns"
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        Ok(stream::filter_map(upstream, |row, _ctx| {
            if row.is_bound() {
                return Err(QuarryError::internal(format!(
                    "pattern row expected, got record {row}"
                )));
            }
            let visible = row
                .pairs()
                .iter()
                .filter(|(alias, _)| !alias.starts_with(DEFAULT_ALIAS_PREFIX))
                .cloned();
            Ok(Some(Tuple::from_pairs(visible)))
        }))
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}
