//! SELECT planning and statement dispatch.
//!
//! The select plan is assembled in a fixed order: target fetch (index-backed
//! for type targets when every predicate block is covered), residual filter,
//! ORDER BY unless the index already streams in that order, projection,
//! DISTINCT, SKIP, LIMIT and finally the timeout wrapper.

use std::time::Duration;

use tracing::debug;

use crate::error::{QuarryError, Result};
use crate::query::ast::{SelectStatement, Statement, Target};
use crate::query::context::ExecutionContext;
use crate::query::expr::Condition;
use crate::query::index::{
    is_diamond_hierarchy, select_indexes, sort_only_index, FetchFromIndexStep,
    GetValueFromIndexEntryStep, IndexSearchDescriptor,
};
use crate::query::pattern::MatchPlanner;
use crate::query::plan::ExecutionPlan;
use crate::query::profile::QueryProfileKind;
use crate::query::steps::{
    DistinctStep, EmptyStep, FetchFromClustersStep, FetchFromRidsStep, FetchFromTypeStep,
    FetchFromValuesStep, FilterStep, LimitStep, OrderByStep, OrderItem, ParallelExecStep,
    ProjectionStep, SkipStep, SubQueryStep, TimeoutStep,
};
use crate::query::traverse::TraversePlanner;

/// Builds the plan of any statement.
pub fn create_plan(statement: &Statement, ctx: &ExecutionContext) -> Result<ExecutionPlan> {
    match statement {
        Statement::Select(select) => SelectPlanner::create_plan(select, ctx),
        Statement::Match(pattern) => MatchPlanner::create_plan(pattern, ctx),
        Statement::Traverse(traverse) => TraversePlanner::create_plan(traverse, ctx),
    }
}

/// Appends the TIMEOUT wrapper when the statement or the configuration asks for one.
pub(crate) fn chain_timeout(plan: &mut ExecutionPlan, limit_ms: Option<u64>, ctx: &ExecutionContext) {
    let limit = limit_ms
        .map(Duration::from_millis)
        .or_else(|| ctx.config().default_timeout());
    if let Some(limit) = limit {
        plan.chain(TimeoutStep::new(limit, ctx.config().timeout_strategy));
    }
}

/// Plans SELECT statements.
#[derive(Debug, Default)]
pub struct SelectPlanner;

/// Fetch half of a select plan.
struct Fetch {
    plan: ExecutionPlan,
    /// The predicate is fully applied inside `plan`.
    filtered: bool,
    /// Rows already come out in ORDER BY order.
    sorted: bool,
}

impl Fetch {
    fn unfiltered(plan: ExecutionPlan) -> Self {
        Self {
            plan,
            filtered: false,
            sorted: false,
        }
    }
}

/// Property names and common direction of an ORDER BY, when an index could serve it.
fn index_order(order_by: &[OrderItem]) -> Option<(Vec<&str>, bool)> {
    let first = order_by.first()?;
    let fields = order_by
        .iter()
        .map(|item| {
            (item.ascending == first.ascending)
                .then(|| item.expr.as_property())
                .flatten()
        })
        .collect::<Option<Vec<_>>>()?;
    Some((fields, first.ascending))
}

impl SelectPlanner {
    /// Builds the plan of `statement`.
    ///
    /// # Errors
    ///
    /// Unknown types or clusters fail here, before any row is produced.
    pub fn create_plan(statement: &SelectStatement, ctx: &ExecutionContext) -> Result<ExecutionPlan> {
        let started = ctx.profile_timer();
        let result = Self::build(statement, ctx);
        ctx.record_profile_timer(QueryProfileKind::PlanBuild, started);
        result
    }

    fn build(statement: &SelectStatement, ctx: &ExecutionContext) -> Result<ExecutionPlan> {
        let fetch = Self::plan_fetch(statement, ctx)?;
        let mut plan = fetch.plan;
        if let (Some(predicate), false) = (&statement.predicate, fetch.filtered) {
            plan.chain(FilterStep::new(predicate.clone()));
        }
        if !statement.order_by.is_empty() && !fetch.sorted {
            let max_results = match (statement.distinct, statement.limit) {
                (false, Some(limit)) => Some(limit.saturating_add(statement.skip.unwrap_or(0))),
                _ => None,
            };
            plan.chain(OrderByStep::new(statement.order_by.clone(), max_results));
        }
        if !statement.projections.is_empty() {
            plan.chain(ProjectionStep::new(statement.projections.clone()));
        }
        if statement.distinct {
            plan.chain(DistinctStep);
        }
        if let Some(skip) = statement.skip.filter(|skip| *skip > 0) {
            plan.chain(SkipStep::new(skip));
        }
        if let Some(limit) = statement.limit {
            plan.chain(LimitStep::new(limit));
        }
        chain_timeout(&mut plan, statement.timeout_ms, ctx);
        Ok(plan)
    }

    /// Plan streaming every record of `target`, unfiltered.
    pub(crate) fn target_plan(target: &Target, ctx: &ExecutionContext) -> Result<ExecutionPlan> {
        Self::filtered_plan(target, None, ctx)
    }

    /// Plan streaming the records of `target` that satisfy `predicate`, with no
    /// ordering, projection or timeout.
    pub(crate) fn filtered_plan(
        target: &Target,
        predicate: Option<&Condition>,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionPlan> {
        let mut statement = SelectStatement::new(target.clone());
        statement.predicate = predicate.cloned();
        let fetch = Self::plan_fetch(&statement, ctx)?;
        let mut plan = fetch.plan;
        if let (Some(predicate), false) = (predicate, fetch.filtered) {
            plan.chain(FilterStep::new(predicate.clone()));
        }
        Ok(plan)
    }

    fn plan_fetch(statement: &SelectStatement, ctx: &ExecutionContext) -> Result<Fetch> {
        let mut plan = ExecutionPlan::new();
        match &statement.target {
            Target::Type(type_name) => return Self::plan_type_fetch(type_name, statement, ctx),
            Target::Clusters(names) => {
                let schema = ctx.database().schema();
                let clusters = names
                    .iter()
                    .map(|name| {
                        schema
                            .cluster_id(name)
                            .ok_or_else(|| QuarryError::ClusterNotFound(name.clone()))
                    })
                    .collect::<Result<Vec<_>>>()?;
                plan.chain(FetchFromClustersStep::new(clusters, true));
            }
            Target::Rids(rids) => plan.chain(FetchFromRidsStep::new(rids.clone())),
            Target::Values(rows) => plan.chain(FetchFromValuesStep::new(rows.clone())),
            Target::Subquery(inner) => plan.chain(SubQueryStep::new(create_plan(inner, ctx)?)),
        }
        Ok(Fetch::unfiltered(plan))
    }

    fn plan_type_fetch(
        type_name: &str,
        statement: &SelectStatement,
        ctx: &ExecutionContext,
    ) -> Result<Fetch> {
        let schema = ctx.database().schema();
        if schema.get_type(type_name).is_none() {
            return Err(QuarryError::TypeNotFound(type_name.to_owned()));
        }
        let order = index_order(&statement.order_by);
        let Some(predicate) = statement.predicate.as_ref().filter(|p| **p != Condition::True) else {
            if let Some((fields, ascending)) = &order {
                if let Some(desc) = sort_only_index(ctx, type_name, fields) {
                    debug!(type_name, index = desc.index().name(), "select.sort_only_index");
                    return Ok(Fetch {
                        plan: index_fetch_plan(desc, *ascending, type_name, ctx),
                        filtered: true,
                        sorted: true,
                    });
                }
            }
            let mut plan = ExecutionPlan::new();
            plan.chain(FetchFromTypeStep::new(
                type_name,
                schema.polymorphic_clusters(type_name),
                true,
            ));
            return Ok(Fetch {
                plan,
                filtered: true,
                sorted: false,
            });
        };
        let blocks = predicate.flatten(ctx.config().max_flattened_blocks);
        if let Some(fetch) = Self::plan_index_fetch(type_name, &blocks, order.as_ref(), ctx) {
            return Ok(fetch);
        }
        let mut plan = ExecutionPlan::new();
        if schema.count(type_name, true) == 0 {
            debug!(type_name, "select.empty_type");
            plan.chain(EmptyStep);
            return Ok(Fetch {
                plan,
                filtered: true,
                sorted: true,
            });
        }
        debug!(type_name, "select.full_scan");
        plan.chain(FetchFromTypeStep::new(
            type_name,
            schema.polymorphic_clusters(type_name),
            true,
        ));
        Ok(Fetch::unfiltered(plan))
    }

    /// Index-backed fetch answering every block, recursing into subtypes when
    /// `type_name` is abstract, holds no records of its own and has no usable
    /// index.
    fn plan_index_fetch(
        type_name: &str,
        blocks: &[Vec<Condition>],
        order: Option<&(Vec<&str>, bool)>,
        ctx: &ExecutionContext,
    ) -> Option<Fetch> {
        if let Some(mut descriptors) = select_indexes(ctx, type_name, blocks) {
            if descriptors.len() == 1 {
                let desc = descriptors.pop()?;
                let (sorted, ascending) = match order {
                    Some((fields, ascending)) => (desc.fully_sorted(fields), *ascending),
                    None => (false, true),
                };
                return Some(Fetch {
                    plan: index_fetch_plan(desc, ascending, type_name, ctx),
                    filtered: true,
                    sorted,
                });
            }
            let branches = descriptors
                .into_iter()
                .map(|desc| index_fetch_plan(desc, true, type_name, ctx))
                .collect();
            let mut plan = ExecutionPlan::new();
            plan.chain(ParallelExecStep::new(branches));
            plan.chain(DistinctStep);
            return Some(Fetch {
                plan,
                filtered: true,
                sorted: false,
            });
        }
        let schema = ctx.database().schema();
        let info = schema.get_type(type_name)?;
        if !info.is_abstract
            || schema.count(type_name, false) > 0
            || info.subclasses.is_empty()
            || is_diamond_hierarchy(&**schema, type_name)
        {
            return None;
        }
        let mut branches = Vec::with_capacity(info.subclasses.len());
        for subclass in &info.subclasses {
            let Some(fetch) = Self::plan_index_fetch(subclass, blocks, None, ctx) else {
                debug!(type_name, subclass = subclass.as_str(), "select.subclass_not_indexed");
                return None;
            };
            branches.push(fetch.plan);
        }
        debug!(type_name, branches = branches.len(), "select.per_subclass_indexes");
        let mut plan = ExecutionPlan::new();
        plan.chain(ParallelExecStep::new(branches));
        Some(Fetch {
            plan,
            filtered: true,
            sorted: false,
        })
    }
}

/// Index scan, entry resolution restricted to the type's clusters,
/// de-duplication when needed and the residual filter.
fn index_fetch_plan(
    desc: IndexSearchDescriptor,
    ascending: bool,
    type_name: &str,
    ctx: &ExecutionContext,
) -> ExecutionPlan {
    let clusters = ctx.database().schema().polymorphic_clusters(type_name);
    let remaining = desc.remaining().clone();
    let distinct = desc.requires_distinct();
    let mut plan = ExecutionPlan::new();
    plan.chain(FetchFromIndexStep::new(desc, ascending));
    plan.chain(GetValueFromIndexEntryStep::new(Some(clusters)));
    if distinct {
        plan.chain(DistinctStep);
    }
    if remaining != Condition::True {
        plan.chain(FilterStep::new(remaining));
    }
    plan
}
