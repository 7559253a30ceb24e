//! Execution plans: ordered chains of steps with a single entry and exit.

use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::profile::{profiled, StepProfile};
use crate::query::steps::{pad, ExecutionStep};
use crate::query::stream::BoxStream;
use crate::query::tuple::Tuple;

/// Structured explain tree.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExplainNode {
    /// Operator name.
    pub op: String,
    /// Operator properties.
    pub props: Vec<ExplainProp>,
    /// Upstream operator followed by nested sub-plans.
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates a node with no properties or inputs.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Looks up a property value by key.
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }
}

/// Single property of an [`ExplainNode`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Display value.
    pub value: String,
    /// Carries literal data that may be redacted in logs.
    pub redactable: bool,
}

impl ExplainProp {
    /// Property without user data.
    pub fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: false,
        }
    }

    /// Property embedding user literals.
    pub fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: true,
        }
    }
}

/// Ordered chain of steps.
#[derive(Debug, Default)]
pub struct ExecutionPlan {
    steps: Vec<Box<dyn ExecutionStep>>,
    profiles: Vec<Arc<StepProfile>>,
    started: AtomicBool,
}

impl ExecutionPlan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    pub fn chain(&mut self, step: impl ExecutionStep + 'static) {
        self.chain_boxed(Box::new(step));
    }

    /// Appends an already boxed step.
    pub fn chain_boxed(&mut self, step: Box<dyn ExecutionStep>) {
        self.steps.push(step);
        self.profiles.push(Arc::new(StepProfile::default()));
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[Box<dyn ExecutionStep>] {
        &self.steps
    }

    /// Returns true when no step was chained.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Per-step profile counters, parallel to [`ExecutionPlan::steps`].
    pub fn profiles(&self) -> &[Arc<StepProfile>] {
        &self.profiles
    }

    /// Starts every step in order and returns the last step's stream.
    ///
    /// A plan starts at most once; run a [`ExecutionPlan::copy`] to execute again.
    pub fn start(&self, ctx: &mut ExecutionContext) -> Result<BoxStream> {
        self.start_from(None, ctx)
    }

    /// Like [`ExecutionPlan::start`], feeding `input` to the first step.
    pub fn start_from(
        &self,
        input: Option<BoxStream>,
        ctx: &mut ExecutionContext,
    ) -> Result<BoxStream> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(QuarryError::internal("execution plan started twice"));
        }
        if self.steps.is_empty() {
            return Err(QuarryError::internal("execution plan has no steps"));
        }
        let profile = ctx.config().profile_steps;
        let mut current: Option<BoxStream> = input;
        for (step, counters) in self.steps.iter().zip(&self.profiles) {
            let stream = step.start(current.take(), ctx)?;
            current = Some(if profile {
                profiled(stream, Arc::clone(counters))
            } else {
                stream
            });
        }
        current.ok_or_else(|| QuarryError::internal("execution plan produced no stream"))
    }

    /// Starts the plan and wraps the stream in an iterator that closes on drop.
    pub fn execute<'a>(&self, ctx: &'a mut ExecutionContext) -> Result<ResultSet<'a>> {
        let stream = self.start(ctx)?;
        Ok(ResultSet {
            stream: Some(stream),
            ctx,
        })
    }

    /// Human-readable plan tree.
    pub fn pretty_print(&self, depth: usize, indent: usize) -> String {
        let mut lines = Vec::with_capacity(self.steps.len());
        for (step, profile) in self.steps.iter().zip(&self.profiles) {
            let mut text = step.pretty_print(depth, indent);
            if profile.rows() > 0 || profile.nanos() > 0 {
                text.push_str(&format!(
                    "\n{}  ({} μs, {} rows)",
                    pad(depth, indent),
                    profile.nanos() / 1_000,
                    profile.rows()
                ));
            }
            lines.push(text);
        }
        lines.join("\n")
    }

    /// Structured explain tree; the last step is the root.
    pub fn explain(&self) -> Option<ExplainNode> {
        let mut upstream: Option<ExplainNode> = None;
        for step in &self.steps {
            let mut node = ExplainNode::new(step.name());
            node.props = step.explain_props();
            if let Some(prev) = upstream.take() {
                node.inputs.push(prev);
            }
            node.inputs
                .extend(step.sub_plans().into_iter().filter_map(ExecutionPlan::explain));
            upstream = Some(node);
        }
        upstream
    }

    /// Explain tree rendered as JSON.
    pub fn explain_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.explain())
            .map_err(|err| QuarryError::internal(format!("explain serialization failed: {err}")))
    }

    /// Deterministic hash of the plan shape.
    pub fn plan_hash(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        for step in &self.steps {
            hasher.write(step.pretty_print(0, 2).as_bytes());
            hasher.write_u8(0);
        }
        hasher.finish()
    }

    /// True if every step can be reused by a later execution.
    pub fn can_be_cached(&self) -> bool {
        self.steps.iter().all(|step| step.can_be_cached())
    }

    /// Deep copy that can be started independently.
    pub fn copy(&self) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new();
        for step in &self.steps {
            plan.chain_boxed(step.copy());
        }
        plan
    }
}

impl Clone for ExecutionPlan {
    fn clone(&self) -> Self {
        self.copy()
    }
}

/// Iterator over a running plan; closes the stream when dropped.
pub struct ResultSet<'a> {
    stream: Option<BoxStream>,
    ctx: &'a mut ExecutionContext,
}

impl ResultSet<'_> {
    /// Closes the underlying stream early.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
    }

    /// Collects the remaining tuples.
    pub fn into_vec(mut self) -> Result<Vec<Tuple>> {
        let mut out = Vec::new();
        for tuple in &mut self {
            out.push(tuple?);
        }
        Ok(out)
    }
}

impl Iterator for ResultSet<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = self.stream.as_mut()?;
        match stream.try_next(self.ctx) {
            Ok(Some(tuple)) => Some(Ok(tuple)),
            Ok(None) => {
                self.close();
                None
            }
            Err(err) => {
                self.close();
                Some(Err(err))
            }
        }
    }
}

impl Drop for ResultSet<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::steps::{EmptyStep, FetchFromValuesStep, LimitStep};
    use crate::storage::MemoryDatabase;
    use crate::types::Rid;

    fn values(n: i64) -> FetchFromValuesStep {
        FetchFromValuesStep::new((0..n).map(|i| Tuple::bound(Rid::new(1, i))).collect())
    }

    #[test]
    fn runs_chain_in_order() -> Result<()> {
        let mut ctx = ExecutionContext::new(MemoryDatabase::new().database());
        let mut plan = ExecutionPlan::new();
        plan.chain(values(5));
        plan.chain(LimitStep::new(2));
        let rows = plan.execute(&mut ctx)?.into_vec()?;
        assert_eq!(rows.len(), 2);
        assert!(plan.start(&mut ctx).is_err());
        assert_eq!(plan.copy().execute(&mut ctx)?.count(), 2);
        Ok(())
    }

    #[test]
    fn explain_nests_upstream() {
        let mut plan = ExecutionPlan::new();
        plan.chain(EmptyStep);
        plan.chain(LimitStep::new(3));
        let root = plan.explain().unwrap();
        assert_eq!(root.op, "LIMIT");
        assert_eq!(root.prop("limit"), Some("3"));
        assert_eq!(root.inputs[0].op, "EMPTY");
        assert!(plan.explain_json().unwrap().contains("\"LIMIT\""));
    }

    #[test]
    fn hash_is_stable_across_copies_and_cacheability_propagates() {
        let mut plan = ExecutionPlan::new();
        plan.chain(EmptyStep);
        assert_eq!(plan.plan_hash(), plan.copy().plan_hash());
        assert!(plan.can_be_cached());
        plan.chain(values(1));
        assert!(!plan.can_be_cached());
    }

    #[test]
    fn profiling_counts_rows() -> Result<()> {
        let config = crate::config::ExecutionConfig {
            profile_steps: true,
            ..Default::default()
        };
        let mut ctx =
            ExecutionContext::with_config(MemoryDatabase::new().database(), config);
        let mut plan = ExecutionPlan::new();
        plan.chain(values(3));
        assert_eq!(plan.execute(&mut ctx)?.count(), 3);
        assert_eq!(plan.profiles()[0].rows(), 3);
        assert!(plan.pretty_print(0, 2).contains("3 rows"));
        Ok(())
    }
}
