#![forbid(unsafe_code)]

//! Query planning and pull-based execution.
//!
//! Statements from [`ast`] are turned into [`plan::ExecutionPlan`]s by the
//! planners; plans are started against an [`context::ExecutionContext`] and
//! pulled one tuple at a time.

/// Statement model consumed by the planners.
pub mod ast;

/// Plan cache keyed by statement.
pub mod cache;

/// Execution context, database handle and cancellation.
pub mod context;

/// Expressions and conditions.
pub mod expr;

/// Index selection, descriptors and index scan steps.
pub mod index;

/// MATCH pattern planning and execution.
pub mod pattern;

/// Execution plans and explain output.
pub mod plan;

/// SELECT planning and statement dispatch.
pub mod planner;

/// Planner and step profiling counters.
pub mod profile;

/// Plan steps.
pub mod steps;

/// Pull-based tuple streams.
pub mod stream;

/// TRAVERSE planning and the graph walker.
pub mod traverse;

/// Rows flowing between steps.
pub mod tuple;

/// Runtime values.
pub mod value;

pub use ast::Statement;
pub use cache::PlanCache;
pub use context::{CancelToken, Database, ExecutionContext};
pub use plan::{ExecutionPlan, ExplainNode, ResultSet};
pub use planner::create_plan;
pub use tuple::Tuple;
pub use value::Value;
