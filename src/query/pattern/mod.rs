//! MATCH patterns: the pattern graph, its scheduler, execution steps and planner.

/// Pattern nodes, edges and edge methods.
pub mod model;

/// MATCH statement planning.
pub mod planner;

/// Traversal order over pattern edges.
pub mod scheduler;

/// Steps binding pattern aliases.
pub mod steps;

pub use model::{EdgeMethod, Pattern, PatternEdge, PatternNode};
pub use planner::MatchPlanner;
pub use scheduler::{schedule, EdgeTraversal, Schedule};
pub use steps::{
    AliasConstraints, FilterNotMatchPatternStep, MatchFirstStep, MatchPrefetchStep, MatchStep,
    ReturnMatchPatternsStep, DEFAULT_ALIAS_PREFIX,
};
