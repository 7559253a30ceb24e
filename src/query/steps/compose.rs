use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::plan::{ExecutionPlan, ExplainProp};
use crate::query::steps::{drain_input, ExecutionStep};
use crate::query::stream::{self, BoxStream, TupleSource};
use crate::query::tuple::Tuple;

fn merge(parts: &[Option<Tuple>]) -> Result<Tuple> {
    let mut row = Tuple::projected();
    for part in parts.iter().flatten() {
        if part.is_bound() {
            return Err(QuarryError::internal(format!(
                "cartesian product expects projected rows, got {part}"
            )));
        }
        for (key, value) in part.pairs() {
            row.set_property(key.clone(), value.clone())?;
        }
    }
    Ok(row)
}

/// Nested-loop enumeration of every combination of sub-plan rows. Inner
/// sub-plans restart from a fresh copy each time an outer level advances.
struct Odometer {
    plans: Vec<ExecutionPlan>,
    streams: Vec<Option<BoxStream>>,
    current: Vec<Option<Tuple>>,
    started: bool,
    done: bool,
}

impl Odometer {
    /// Restarts level `level` and reads its first row; false if it is empty.
    fn reset(&mut self, level: usize, ctx: &mut ExecutionContext) -> Result<bool> {
        if let Some(mut old) = self.streams[level].take() {
            old.close();
        }
        let mut fresh = self.plans[level].copy().start(ctx)?;
        let first = fresh.try_next(ctx)?;
        self.streams[level] = Some(fresh);
        self.current[level] = first;
        Ok(self.current[level].is_some())
    }

    fn finish(&mut self) -> Result<Option<Tuple>> {
        self.done = true;
        self.release();
        Ok(None)
    }
}

impl TupleSource for Odometer {
    fn produce(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        if self.done || self.plans.is_empty() {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            for level in 0..self.plans.len() {
                if !self.reset(level, ctx)? {
                    return self.finish();
                }
            }
            return merge(&self.current).map(Some);
        }
        let mut level = self.plans.len() - 1;
        loop {
            let next = match self.streams[level].as_mut() {
                Some(stream) => stream.try_next(ctx)?,
                None => None,
            };
            if let Some(tuple) = next {
                self.current[level] = Some(tuple);
                for inner in level + 1..self.plans.len() {
                    if !self.reset(inner, ctx)? {
                        return self.finish();
                    }
                }
                return merge(&self.current).map(Some);
            }
            if level == 0 {
                return self.finish();
            }
            level -= 1;
        }
    }

    fn release(&mut self) {
        for slot in self.streams.iter_mut().rev() {
            if let Some(mut stream) = slot.take() {
                stream.close();
            }
        }
    }
}

/// Cartesian product of independent sub-plans producing projected rows.
///
/// Each output row merges one row of every sub-plan, in sub-plan order.
#[derive(Clone, Debug)]
pub struct CartesianProductStep {
    plans: Vec<ExecutionPlan>,
}

impl CartesianProductStep {
    /// Combines `plans`, the first being the outermost loop.
    pub fn new(plans: Vec<ExecutionPlan>) -> Self {
        Self { plans }
    }
}

impl ExecutionStep for CartesianProductStep {
    fn name(&self) -> &'static str {
        "CARTESIAN PRODUCT"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        let n = self.plans.len();
        Ok(stream::from_source(Odometer {
            plans: self.plans.iter().map(ExecutionPlan::copy).collect(),
            streams: (0..n).map(|_| None).collect(),
            current: vec![None; n],
            started: false,
            done: false,
        }))
    }

    fn sub_plans(&self) -> Vec<&ExecutionPlan> {
        self.plans.iter().collect()
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

/// Concatenation of sub-plans, run one after another.
#[derive(Clone, Debug)]
pub struct ParallelExecStep {
    plans: Vec<ExecutionPlan>,
}

impl ParallelExecStep {
    /// Unions `plans` in order.
    pub fn new(plans: Vec<ExecutionPlan>) -> Self {
        Self { plans }
    }
}

impl ExecutionStep for ParallelExecStep {
    fn name(&self) -> &'static str {
        "PARALLEL"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        let mut pending = self.plans.iter().map(ExecutionPlan::copy).collect::<Vec<_>>().into_iter();
        Ok(stream::chain(move |ctx| match pending.next() {
            Some(plan) => plan.start(ctx).map(Some),
            None => Ok(None),
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("branches", self.plans.len().to_string())]
    }

    fn sub_plans(&self) -> Vec<&ExecutionPlan> {
        self.plans.iter().collect()
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}

/// Runs a nested plan as the source of the enclosing one.
#[derive(Clone, Debug)]
pub struct SubQueryStep {
    plan: ExecutionPlan,
}

impl SubQueryStep {
    /// Wraps `plan`.
    pub fn new(plan: ExecutionPlan) -> Self {
        Self { plan }
    }
}

impl ExecutionStep for SubQueryStep {
    fn name(&self) -> &'static str {
        "SUBQUERY"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        self.plan.copy().start(ctx)
    }

    fn sub_plans(&self) -> Vec<&ExecutionPlan> {
        vec![&self.plan]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}
