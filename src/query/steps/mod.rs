//! Plan steps.
//!
//! A step is immutable configuration. `start` receives the predecessor's
//! stream (if any) and returns the step's own stream; all runtime state lives
//! in that stream, so a step can be started again from a copied plan.

use std::fmt;

use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::plan::{ExecutionPlan, ExplainProp};
use crate::query::stream::{self, BoxStream};

/// Cartesian product, parallel union and sub-query steps.
pub mod compose;
/// Source steps reading types, clusters, record ids and in-memory rows.
pub mod fetch;
/// Filtering and de-duplication.
pub mod filter;
/// Ordering, skip and limit.
pub mod order;
/// Projections.
pub mod project;
/// Wall-clock time limits.
pub mod timeout;

pub use compose::{CartesianProductStep, ParallelExecStep, SubQueryStep};
pub use fetch::{
    FetchFromClustersStep, FetchFromRidsStep, FetchFromTypeStep, FetchFromValuesStep,
    FilterByTypeStep,
};
pub use filter::{DistinctStep, FilterStep};
pub use order::{LimitStep, OrderByStep, OrderItem, SkipStep};
pub use project::{ProjectionItem, ProjectionStep};
pub use timeout::TimeoutStep;

/// One node of an execution plan.
pub trait ExecutionStep: Send + Sync + fmt::Debug {
    /// Short operator name shown in plan output.
    fn name(&self) -> &'static str;

    /// Starts the step on top of `input`, the predecessor's stream.
    ///
    /// Source steps drain and close `input` before producing anything.
    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream>;

    /// Human-readable description, indented by `depth * indent` spaces.
    fn pretty_print(&self, depth: usize, indent: usize) -> String {
        let mut out = format!("{}+ {}", pad(depth, indent), self.name());
        for prop in self.explain_props() {
            out.push_str(&format!("\n{}  {}: {}", pad(depth, indent), prop.key, prop.value));
        }
        for plan in self.sub_plans() {
            out.push('\n');
            out.push_str(&plan.pretty_print(depth + 1, indent));
        }
        out
    }

    /// Properties shown by `pretty_print` and the explain tree.
    fn explain_props(&self) -> Vec<ExplainProp> {
        Vec::new()
    }

    /// Nested plans this step runs.
    fn sub_plans(&self) -> Vec<&ExecutionPlan> {
        Vec::new()
    }

    /// False if the step embeds state that cannot be reproduced on a later run.
    fn can_be_cached(&self) -> bool {
        self.sub_plans().iter().all(|plan| plan.can_be_cached())
    }

    /// Deep copy with fresh runtime state.
    fn copy(&self) -> Box<dyn ExecutionStep>;
}

/// Indentation prefix.
pub(crate) fn pad(depth: usize, indent: usize) -> String {
    " ".repeat(depth * indent)
}

/// Returns the predecessor stream or fails for steps that need one.
pub(crate) fn require_input(input: Option<BoxStream>, step: &str) -> Result<BoxStream> {
    input.ok_or_else(|| QuarryError::internal(format!("{step} requires an upstream step")))
}

/// Drains and closes a predecessor before a source step starts producing.
pub(crate) fn drain_input(input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<()> {
    match input {
        Some(upstream) => stream::drain(upstream, ctx),
        None => Ok(()),
    }
}

/// Produces nothing; used when a plan is provably empty.
#[derive(Clone, Debug, Default)]
pub struct EmptyStep;

impl ExecutionStep for EmptyStep {
    fn name(&self) -> &'static str {
        "EMPTY"
    }

    fn start(&self, input: Option<BoxStream>, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        drain_input(input, ctx)?;
        Ok(stream::empty())
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}
