use std::collections::BTreeSet;

use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::query::context::ExecutionContext;
use crate::query::expr::Condition;
use crate::query::plan::ExplainProp;
use crate::query::steps::{require_input, ExecutionStep};
use crate::query::stream::{self, BoxStream};

/// Keeps tuples matching a condition.
#[derive(Clone, Debug)]
pub struct FilterStep {
    condition: Condition,
}

impl FilterStep {
    /// Filters on `condition`.
    pub fn new(condition: Condition) -> Self {
        Self { condition }
    }

    /// The filter condition.
    pub fn condition(&self) -> &Condition {
        &self.condition
    }
}

impl ExecutionStep for FilterStep {
    fn name(&self) -> &'static str {
        "FILTER ITEMS WHERE"
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        let condition = self.condition.clone();
        Ok(stream::filter_map(upstream, move |tuple, ctx| {
            Ok(condition.matches(&tuple, ctx)?.then_some(tuple))
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::literal("condition", self.condition.to_string())]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

/// Drops tuples already produced: bound tuples by record id, projected tuples
/// by their property values.
#[derive(Clone, Debug, Default)]
pub struct DistinctStep;

impl ExecutionStep for DistinctStep {
    fn name(&self) -> &'static str {
        "DISTINCT"
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        let mut seen_rids = FxHashSet::default();
        let mut seen_rows = BTreeSet::new();
        Ok(stream::filter_map(upstream, move |tuple, _ctx| {
            let fresh = match tuple.rid() {
                Some(rid) => seen_rids.insert(rid),
                None => seen_rows.insert(tuple.to_string()),
            };
            Ok(fresh.then_some(tuple))
        }))
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
    use crate::query::tuple::Tuple;
    use crate::storage::MemoryDatabase;
    use crate::types::Rid;

    #[test]
    fn distinct_by_identity_and_value() -> Result<()> {
        let mut ctx = ExecutionContext::new(MemoryDatabase::new().database());
        let rows = vec![
            Tuple::bound(Rid::new(1, 1)),
            Tuple::bound(Rid::new(1, 1)).with_metadata("$depth", 3),
            Tuple::from_pairs([("a", 1)]),
            Tuple::from_pairs([("a", 1)]),
            Tuple::from_pairs([("a", 2)]),
        ];
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromValuesStep::new(rows));
        plan.chain(DistinctStep);
        assert_eq!(plan.execute(&mut ctx)?.count(), 3);
        Ok(())
    }

    #[test]
    fn filter_on_projected_rows() -> Result<()> {
        let mut ctx = ExecutionContext::new(MemoryDatabase::new().database());
        let rows = (0..10).map(|i| Tuple::from_pairs([("n", i)])).collect();
        let mut plan = ExecutionPlan::new();
        plan.chain(FetchFromValuesStep::new(rows));
        plan.chain(FilterStep::new(Condition::ge("n", 7)));
        assert_eq!(plan.execute(&mut ctx)?.count(), 3);
        Ok(())
    }
}
