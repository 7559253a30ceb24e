//! MATCH planning.
//!
//! Unnamed nodes get generated aliases, repeated aliases merge their
//! constraints, and every connected component of the pattern is scheduled
//! from its cheapest alias. Components are joined with a cartesian product;
//! NOT expressions, the RETURN clause and the row modifiers follow.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{QuarryError, Result};
use crate::query::ast::{MatchExpression, MatchReturn, MatchStatement, NodeFilter, Target};
use crate::query::context::ExecutionContext;
use crate::query::expr::Condition;
use crate::query::index::select_indexes;
use crate::query::pattern::model::{Pattern, PatternEdge};
use crate::query::pattern::scheduler::{schedule, EdgeTraversal};
use crate::query::pattern::steps::{
    AliasConstraints, FilterNotMatchPatternStep, MatchFirstStep, MatchPrefetchStep, MatchStep,
    ReturnMatchPatternsStep, DEFAULT_ALIAS_PREFIX,
};
use crate::query::plan::ExecutionPlan;
use crate::query::planner::{chain_timeout, SelectPlanner};
use crate::query::profile::QueryProfileKind;
use crate::query::steps::{
    CartesianProductStep, DistinctStep, EmptyStep, FetchFromClustersStep, FetchFromRidsStep,
    FilterByTypeStep, FilterStep, LimitStep, OrderByStep, ProjectionStep, SkipStep,
};

/// Plans MATCH statements.
#[derive(Debug, Default)]
pub struct MatchPlanner;

/// Hands out `$QUARRY_DEFAULT_ALIAS_<n>` to nodes without an alias.
#[derive(Default)]
struct AliasGenerator {
    next: usize,
}

impl AliasGenerator {
    fn assign(&mut self, expressions: &mut [MatchExpression]) {
        for expression in expressions {
            for node in expression.nodes_mut() {
                if node.alias.is_none() {
                    node.alias = Some(format!("{DEFAULT_ALIAS_PREFIX}{}", self.next));
                    self.next += 1;
                }
            }
        }
    }
}

fn alias_of(node: &NodeFilter) -> Result<&str> {
    node.alias
        .as_deref()
        .ok_or_else(|| QuarryError::internal("pattern node without alias"))
}

/// Folds the constraints of one node occurrence into `into`.
fn merge_node(into: &mut AliasConstraints, node: &NodeFilter, alias: &str, ctx: &ExecutionContext) -> Result<()> {
    let schema = ctx.database().schema();
    if let Some(type_name) = &node.type_name {
        if schema.get_type(type_name).is_none() {
            return Err(QuarryError::TypeNotFound(type_name.clone()));
        }
        into.type_name = match into.type_name.take() {
            None => Some(type_name.clone()),
            Some(existing) if schema.is_subclass_of(type_name, &existing) => Some(type_name.clone()),
            Some(existing) if schema.is_subclass_of(&existing, type_name) => Some(existing),
            Some(existing) => {
                return Err(QuarryError::Invalid(format!(
                    "alias {alias} declared as both {existing} and {type_name}"
                )))
            }
        };
    }
    if let Some(name) = &node.cluster {
        let cluster = schema
            .cluster_id(name)
            .ok_or_else(|| QuarryError::ClusterNotFound(name.clone()))?;
        if into.cluster.is_some_and(|existing| existing != cluster) {
            return Err(QuarryError::Invalid(format!(
                "alias {alias} declared in two different clusters"
            )));
        }
        into.cluster = Some(cluster);
    }
    if let Some(rid) = node.rid {
        if into.rid.is_some_and(|existing| existing != rid) {
            return Err(QuarryError::Invalid(format!(
                "alias {alias} declared with two different record ids"
            )));
        }
        into.rid = Some(rid);
    }
    if let Some(filter) = &node.filter {
        into.filter = Some(match into.filter.take() {
            Some(existing) => Condition::and_all(vec![existing, filter.clone()]),
            None => filter.clone(),
        });
    }
    into.optional |= node.optional;
    Ok(())
}

/// Plan producing the candidate records of one alias.
fn alias_plan(alias: &str, constraints: &AliasConstraints, ctx: &ExecutionContext) -> Result<ExecutionPlan> {
    let mut plan = ExecutionPlan::new();
    if let Some(rid) = constraints.rid {
        plan.chain(FetchFromRidsStep::new(vec![rid]));
        if let Some(cluster) = constraints.cluster {
            plan.chain(FilterByTypeStep::by_clusters([cluster]));
        }
        if let Some(type_name) = &constraints.type_name {
            plan.chain(FilterByTypeStep::by_type(type_name.clone()));
        }
    } else if let Some(cluster) = constraints.cluster {
        plan.chain(FetchFromClustersStep::new(vec![cluster], true));
        if let Some(type_name) = &constraints.type_name {
            plan.chain(FilterByTypeStep::by_type(type_name.clone()));
        }
    } else if let Some(type_name) = &constraints.type_name {
        return SelectPlanner::filtered_plan(
            &Target::type_name(type_name.clone()),
            constraints.filter.as_ref(),
            ctx,
        );
    } else {
        return Err(QuarryError::Invalid(format!(
            "alias {alias} needs a type, cluster or record id to start a match"
        )));
    }
    if let Some(filter) = &constraints.filter {
        plan.chain(FilterStep::new(filter.clone()));
    }
    Ok(plan)
}

/// Upper bound on the records an alias can bind, when one is known.
///
/// Zero only when the type or cluster holds no records. Index statistics are
/// averages over earlier lookups of the same shape, so they can lower the
/// estimate but never bring it to zero.
fn estimate(constraints: &AliasConstraints, ctx: &ExecutionContext) -> Option<u64> {
    if constraints.rid.is_some() {
        return Some(1);
    }
    let schema = ctx.database().schema();
    let by_cluster = constraints.cluster.map(|cluster| schema.count_cluster(cluster));
    let by_type = constraints.type_name.as_deref().map(|type_name| {
        let count = schema.count(type_name, true);
        if count == 0 {
            return 0;
        }
        let filter = constraints
            .filter
            .as_ref()
            .filter(|_| constraints.dependencies().is_empty());
        let Some(filter) = filter else {
            return count;
        };
        let blocks = filter.flatten(ctx.config().max_flattened_blocks);
        match select_indexes(ctx, type_name, &blocks) {
            Some(descriptors) => descriptors
                .iter()
                .map(|desc| desc.cost(ctx))
                .fold(0u64, u64::saturating_add)
                .clamp(1, count),
            None => count,
        }
    });
    match (by_cluster, by_type) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

impl MatchPlanner {
    /// Builds the plan of `statement`.
    ///
    /// # Errors
    ///
    /// Unknown types or clusters, conflicting alias constraints and patterns
    /// that cannot be scheduled fail here.
    pub fn create_plan(statement: &MatchStatement, ctx: &ExecutionContext) -> Result<ExecutionPlan> {
        let started = ctx.profile_timer();
        let result = Self::build(statement, ctx);
        ctx.record_profile_timer(QueryProfileKind::PlanBuild, started);
        result
    }

    fn build(statement: &MatchStatement, ctx: &ExecutionContext) -> Result<ExecutionPlan> {
        if statement.expressions.is_empty() {
            return Err(QuarryError::Invalid("MATCH needs at least one expression".into()));
        }
        let mut aliases = AliasGenerator::default();
        let mut expressions = statement.expressions.clone();
        aliases.assign(&mut expressions);
        let mut not_expressions = statement.not_expressions.clone();
        aliases.assign(&mut not_expressions);

        let mut constraints: BTreeMap<String, AliasConstraints> = BTreeMap::new();
        for expression in &expressions {
            for node in expression.nodes() {
                let alias = alias_of(node)?;
                merge_node(constraints.entry(alias.to_owned()).or_default(), node, alias, ctx)?;
            }
        }
        let pattern = Pattern::from_expressions(&expressions)?;

        let mut estimates = BTreeMap::new();
        let mut dependencies = BTreeMap::new();
        for (alias, constraint) in &constraints {
            let deps: BTreeSet<String> = constraint
                .dependencies()
                .into_iter()
                .filter(|dep| dep != alias)
                .collect();
            if let Some(estimate) = estimate(constraint, ctx) {
                if estimate == 0 && !constraint.optional {
                    debug!(alias = alias.as_str(), "match.empty_alias");
                    let mut plan = ExecutionPlan::new();
                    plan.chain(EmptyStep);
                    return Ok(plan);
                }
                estimates.insert(alias.clone(), estimate);
            }
            if !deps.is_empty() {
                dependencies.insert(alias.clone(), deps);
            }
        }

        let mut plan = ExecutionPlan::new();
        let mut components = Vec::new();
        for component in pattern.disjoint_patterns() {
            let started = ctx.profile_timer();
            let order = schedule(&component, &estimates, &dependencies);
            ctx.record_profile_timer(QueryProfileKind::Schedule, started);
            let order = order?;
            let first = order
                .first()
                .ok_or_else(|| QuarryError::internal("schedule without a start alias"))?
                .to_owned();
            let first_constraints = constraints.get(&first).cloned().unwrap_or_default();
            let first_plan = alias_plan(&first, &first_constraints, ctx)?;
            let prefetch = estimates
                .get(&first)
                .is_some_and(|estimate| *estimate < ctx.config().prefetch_threshold)
                && !dependencies.contains_key(&first);
            if prefetch {
                plan.chain(MatchPrefetchStep::new(first.clone(), first_plan.copy()));
            }

            let mut sub = ExecutionPlan::new();
            sub.chain(MatchFirstStep::new(first.clone(), first_plan));
            let mut bound = BTreeSet::from([first]);
            for traversal in order.traversals {
                let source = traversal.source().to_owned();
                let target = traversal.target().to_owned();
                let source_plan = if bound.contains(&source) {
                    None
                } else {
                    let source_constraints = constraints.get(&source).cloned().unwrap_or_default();
                    Some(alias_plan(&source, &source_constraints, ctx)?)
                };
                let target_constraints = constraints.get(&target).cloned().unwrap_or_default();
                sub.chain(MatchStep::new(traversal, target_constraints, source_plan)?);
                bound.insert(source);
                bound.insert(target);
            }
            components.push(sub);
        }
        if components.len() > 1 {
            plan.chain(CartesianProductStep::new(components));
        } else if let Some(single) = components.pop() {
            for step in single.steps() {
                plan.chain_boxed(step.copy());
            }
        }

        for expression in &not_expressions {
            plan.chain(FilterNotMatchPatternStep::new(Self::not_plan(
                expression,
                &constraints,
                ctx,
            )?));
        }

        match &statement.returns {
            MatchReturn::Patterns => plan.chain(ReturnMatchPatternsStep),
            MatchReturn::Items(items) => plan.chain(ProjectionStep::new(items.clone())),
        }
        if statement.distinct {
            plan.chain(DistinctStep);
        }
        if !statement.order_by.is_empty() {
            let max_results = match (statement.distinct, statement.limit) {
                (false, Some(limit)) => Some(limit.saturating_add(statement.skip.unwrap_or(0))),
                _ => None,
            };
            plan.chain(OrderByStep::new(statement.order_by.clone(), max_results));
        }
        if let Some(skip) = statement.skip.filter(|skip| *skip > 0) {
            plan.chain(SkipStep::new(skip));
        }
        if let Some(limit) = statement.limit {
            plan.chain(LimitStep::new(limit));
        }
        chain_timeout(&mut plan, None, ctx);
        debug!(
            aliases = constraints.len(),
            steps = plan.steps().len(),
            "match.planned"
        );
        Ok(plan)
    }

    /// Forward expansion of a NOT expression, starting from a matched alias.
    fn not_plan(
        expression: &MatchExpression,
        positive: &BTreeMap<String, AliasConstraints>,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionPlan> {
        let origin = alias_of(&expression.origin)?;
        let plain_origin = NodeFilter::alias(origin);
        if !positive.contains_key(origin) || expression.origin != plain_origin {
            return Err(QuarryError::Invalid(format!(
                "NOT expression must start from a matched alias without constraints, got {origin}"
            )));
        }
        let mut plan = ExecutionPlan::new();
        let mut previous = origin.to_owned();
        for (id, item) in expression.items.iter().enumerate() {
            if item.while_condition.is_some() || item.max_depth.is_some() {
                return Err(QuarryError::UnsupportedCondition(
                    "multi-hop edges in NOT expressions".into(),
                ));
            }
            let target = alias_of(&item.target)?;
            let mut constraints = AliasConstraints::default();
            merge_node(&mut constraints, &item.target, target, ctx)?;
            let traversal = EdgeTraversal {
                edge: PatternEdge {
                    id,
                    from: previous.clone(),
                    to: target.to_owned(),
                    method: item.method.clone(),
                    while_condition: None,
                    max_depth: None,
                },
                forward: true,
            };
            plan.chain(MatchStep::new(traversal, constraints, None)?);
            previous = target.to_owned();
        }
        if plan.is_empty() {
            return Err(QuarryError::Invalid("NOT expression without edges".into()));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::pattern::model::EdgeMethod;
    use crate::storage::MemoryDatabase;

    fn names(plan: &ExecutionPlan) -> Vec<&'static str> {
        plan.steps().iter().map(|step| step.name()).collect()
    }

    #[test]
    fn small_start_alias_is_prefetched() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("Person", &[])?;
        let a = db.insert("Person", [("name", "a")])?;
        let b = db.insert("Person", [("name", "b")])?;
        db.add_edge(a, "knows", b)?;
        let ctx = ExecutionContext::new(db.database());
        let statement = MatchStatement::new().expression(
            MatchExpression::new(NodeFilter::alias("p").of_type("Person"))
                .then(EdgeMethod::out(["knows"]), NodeFilter::alias("f")),
        );
        let plan = MatchPlanner::create_plan(&statement, &ctx)?;
        assert_eq!(
            names(&plan),
            vec!["PREFETCH", "SET", "MATCH", "RETURN $patterns"]
        );
        Ok(())
    }

    #[test]
    fn conflicting_types_are_rejected() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("A", &[])?;
        db.create_type("B", &[])?;
        db.insert("A", [("x", 1)])?;
        let ctx = ExecutionContext::new(db.database());
        let statement = MatchStatement::new()
            .expression(MatchExpression::new(NodeFilter::alias("n").of_type("A")))
            .expression(MatchExpression::new(NodeFilter::alias("n").of_type("B")));
        let err = MatchPlanner::create_plan(&statement, &ctx).unwrap_err();
        assert_eq!(err.code(), "Invalid");
        Ok(())
    }

    #[test]
    fn subclass_constraint_wins() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("Animal", &[])?;
        db.create_type("Dog", &["Animal"])?;
        let ctx = ExecutionContext::new(db.database());
        let mut merged = AliasConstraints::default();
        merge_node(&mut merged, &NodeFilter::alias("x").of_type("Animal"), "x", &ctx)?;
        merge_node(&mut merged, &NodeFilter::alias("x").of_type("Dog").optional(), "x", &ctx)?;
        assert_eq!(merged.type_name.as_deref(), Some("Dog"));
        assert!(merged.optional);
        Ok(())
    }

    #[test]
    fn empty_required_alias_short_circuits() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("Ghost", &[])?;
        let ctx = ExecutionContext::new(db.database());
        let statement =
            MatchStatement::new().expression(MatchExpression::new(NodeFilter::alias("g").of_type("Ghost")));
        let plan = MatchPlanner::create_plan(&statement, &ctx)?;
        assert_eq!(names(&plan), vec!["EMPTY"]);
        Ok(())
    }

    #[test]
    fn disconnected_components_use_cartesian_product() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("A", &[])?;
        db.create_type("B", &[])?;
        db.insert("A", [("x", 1)])?;
        db.insert("B", [("x", 2)])?;
        let ctx = ExecutionContext::new(db.database());
        let statement = MatchStatement::new()
            .expression(MatchExpression::new(NodeFilter::alias("a").of_type("A")))
            .expression(MatchExpression::new(NodeFilter::alias("b").of_type("B")));
        let plan = MatchPlanner::create_plan(&statement, &ctx)?;
        assert_eq!(
            names(&plan),
            vec!["PREFETCH", "PREFETCH", "CARTESIAN PRODUCT", "RETURN $patterns"]
        );
        Ok(())
    }
}
