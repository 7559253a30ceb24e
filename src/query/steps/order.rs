use std::cmp::Ordering;

use crate::error::Result;
use crate::query::context::ExecutionContext;
use crate::query::expr::Expr;
use crate::query::plan::ExplainProp;
use crate::query::steps::{require_input, ExecutionStep};
use crate::query::stream::{self, BoxStream, TupleSource};
use crate::query::tuple::Tuple;
use crate::query::value::Value;

/// One ORDER BY key.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderItem {
    /// Sort key.
    pub expr: Expr,
    /// Ascending when true.
    pub ascending: bool,
}

impl OrderItem {
    /// Ascending on a property.
    pub fn asc(property: &str) -> Self {
        Self {
            expr: Expr::prop(property),
            ascending: true,
        }
    }

    /// Descending on a property.
    pub fn desc(property: &str) -> Self {
        Self {
            expr: Expr::prop(property),
            ascending: false,
        }
    }
}

/// Materialises its input and sorts it.
///
/// With `max_results` (skip + limit of the statement), only that many rows are kept.
#[derive(Clone, Debug)]
pub struct OrderByStep {
    items: Vec<OrderItem>,
    max_results: Option<usize>,
}

impl OrderByStep {
    /// Sorts on `items`, keeping at most `max_results` rows.
    pub fn new(items: Vec<OrderItem>, max_results: Option<usize>) -> Self {
        Self { items, max_results }
    }
}

impl ExecutionStep for OrderByStep {
    fn name(&self) -> &'static str {
        "ORDER BY"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let mut upstream = require_input(input, self.name())?;
        let mut keyed: Vec<(Vec<Value>, Tuple)> = Vec::new();
        let filled = (|| -> Result<()> {
            while let Some(tuple) = upstream.try_next(ctx)? {
                let keys = self
                    .items
                    .iter()
                    .map(|item| item.expr.eval(&tuple, ctx))
                    .collect::<Result<Vec<_>>>()?;
                keyed.push((keys, tuple));
            }
            Ok(())
        })();
        upstream.close();
        filled?;
        let items = &self.items;
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), item) in a.iter().zip(b).zip(items) {
                let ord = x.total_cmp(y);
                let ord = if item.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        if let Some(max) = self.max_results {
            keyed.truncate(max);
        }
        Ok(stream::from_tuples(keyed.into_iter().map(|(_, t)| t)))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        let keys: Vec<String> = self
            .items
            .iter()
            .map(|item| format!("{} {}", item.expr, if item.ascending { "ASC" } else { "DESC" }))
            .collect();
        let mut props = vec![ExplainProp::plain("keys", keys.join(", "))];
        if let Some(max) = self.max_results {
            props.push(ExplainProp::plain("max_results", max.to_string()));
        }
        props
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

/// Discards the first `n` tuples.
#[derive(Clone, Debug)]
pub struct SkipStep {
    skip: usize,
}

impl SkipStep {
    /// Skips `skip` tuples.
    pub fn new(skip: usize) -> Self {
        Self { skip }
    }
}

impl ExecutionStep for SkipStep {
    fn name(&self) -> &'static str {
        "SKIP"
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        let mut remaining = self.skip;
        Ok(stream::filter_map(upstream, move |tuple, _ctx| {
            if remaining > 0 {
                remaining -= 1;
                return Ok(None);
            }
            Ok(Some(tuple))
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("skip", self.skip.to_string())]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

struct Limited {
    inner: Option<BoxStream>,
    remaining: usize,
}

impl TupleSource for Limited {
    fn produce(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        if self.remaining == 0 {
            // Release upstream cursors as soon as the limit is reached.
            self.release();
            return Ok(None);
        }
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        let next = inner.try_next(ctx)?;
        if next.is_some() {
            self.remaining -= 1;
        }
        Ok(next)
    }

    fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.close();
        }
    }
}

/// Stops after `n` tuples.
#[derive(Clone, Debug)]
pub struct LimitStep {
    limit: usize,
}

impl LimitStep {
    /// Produces at most `limit` tuples.
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl ExecutionStep for LimitStep {
    fn name(&self) -> &'static str {
        "LIMIT"
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        Ok(stream::from_source(Limited {
            inner: Some(upstream),
            remaining: self.limit,
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("limit", self.limit.to_string())]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::ExecutionPlan;
    use crate::query::steps::FetchFromValuesStep;
    use crate::storage::MemoryDatabase;

    fn rows() -> Vec<Tuple> {
        [("b", 2), ("a", 2), ("c", 1)]
            .into_iter()
            .map(|(name, rank)| Tuple::from_pairs([("name", Value::from(name)), ("rank", Value::from(rank))]))
            .collect()
    }

    fn names(rows: Vec<Tuple>) -> Vec<String> {
        rows.iter()
            .filter_map(|t| t.get("name").and_then(Value::as_str).map(str::to_owned))
            .collect()
    }

    #[test]
    fn multi_key_sort_with_bound() -> Result<()> {
        let mut ctx = ExecutionContext::new(MemoryDatabase::new().database());
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromValuesStep::new(rows()));
        plan.chain(OrderByStep::new(
            vec![OrderItem::desc("rank"), OrderItem::asc("name")],
            Some(2),
        ));
        assert_eq!(names(plan.execute(&mut ctx)?.into_vec()?), vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn skip_then_limit() -> Result<()> {
        let mut ctx = ExecutionContext::new(MemoryDatabase::new().database());
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromValuesStep::new(rows()));
        plan.chain(SkipStep::new(1));
        plan.chain(LimitStep::new(1));
        assert_eq!(names(plan.execute(&mut ctx)?.into_vec()?), vec!["a"]);
        Ok(())
    }
}
