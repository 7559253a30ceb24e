//! Orders pattern edges into a traversal schedule.
//!
//! Start aliases are tried smallest estimate first. From each start the
//! pattern is walked depth first; every edge is recorded exactly once, in the
//! direction it will be expanded at execution time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::error::{QuarryError, Result};
use crate::query::pattern::model::{EdgeMethod, Pattern, PatternEdge};

/// One scheduled edge expansion.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeTraversal {
    /// The pattern edge.
    pub edge: PatternEdge,
    /// Expanded from `edge.from` to `edge.to` when true, backwards otherwise.
    pub forward: bool,
}

impl EdgeTraversal {
    /// Alias already bound when the edge is expanded.
    pub fn source(&self) -> &str {
        if self.forward {
            &self.edge.from
        } else {
            &self.edge.to
        }
    }

    /// Alias bound by the expansion.
    pub fn target(&self) -> &str {
        if self.forward {
            &self.edge.to
        } else {
            &self.edge.from
        }
    }

    /// Hop definition in the scheduled direction.
    pub fn method(&self) -> Result<EdgeMethod> {
        if self.forward {
            return Ok(self.edge.method.clone());
        }
        self.edge.method.reversed().ok_or_else(|| {
            QuarryError::UnsupportedCondition(format!(
                "edge {} cannot be traversed backwards",
                self.edge.method
            ))
        })
    }
}

impl fmt::Display for EdgeTraversal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.method() {
            Ok(method) => write!(f, "{{{}}}.{method}{{{}}}", self.source(), self.target()),
            Err(_) => write!(f, "{{{}}} <- {{{}}}", self.source(), self.target()),
        }
    }
}

/// Traversal order for one connected pattern.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schedule {
    /// Aliases each walk started from, in order; the first one is fetched
    /// before any edge is expanded.
    pub starts: Vec<String>,
    /// One entry per pattern edge.
    pub traversals: Vec<EdgeTraversal>,
}

impl Schedule {
    /// Alias fetched first.
    pub fn first(&self) -> Option<&str> {
        self.starts.first().map(String::as_str)
    }
}

struct SchedulerState<'a> {
    pattern: &'a Pattern,
    remaining_deps: BTreeMap<String, BTreeSet<String>>,
    visited: BTreeSet<String>,
    scheduled: Vec<bool>,
    traversals: Vec<EdgeTraversal>,
}

impl SchedulerState<'_> {
    fn is_optional(&self, alias: &str) -> bool {
        self.pattern.node(alias).is_some_and(|n| n.optional)
    }

    /// Either end may act as the source of `edge`.
    fn is_bidirectional(&self, edge: &PatternEdge) -> bool {
        edge.is_bidirectional() && !self.is_optional(&edge.to)
    }

    fn deps_satisfied(&self, alias: &str) -> bool {
        self.remaining_deps.get(alias).map_or(true, BTreeSet::is_empty)
    }

    /// An unbroken run of optional nodes reached through `edge` from optional `from`.
    fn is_optional_chain(&self, from: &str, edge: usize, to: &str, seen: &mut BTreeSet<usize>) -> bool {
        if !self.is_optional(from) || !self.is_optional(to) {
            return false;
        }
        seen.insert(edge);
        let Some(node) = self.pattern.node(to) else {
            return false;
        };
        for &sub in &node.out_edges {
            if seen.contains(&sub) {
                continue;
            }
            let Some(next) = self.pattern.edge(sub) else {
                return false;
            };
            if !self.is_optional_chain(to, sub, &next.to, seen) {
                return false;
            }
        }
        true
    }

    fn record(&mut self, edge: &PatternEdge, forward: bool) {
        self.scheduled[edge.id] = true;
        self.traversals.push(EdgeTraversal {
            edge: edge.clone(),
            forward,
        });
    }

    fn visit(&mut self, current: &str) {
        let pattern = self.pattern;
        self.visited.insert(current.to_owned());
        self.remaining_deps.remove(current);
        for deps in self.remaining_deps.values_mut() {
            deps.remove(current);
        }
        let Some(node) = pattern.node(current) else {
            return;
        };
        let mut candidates: Vec<(usize, bool)> = node.out_edges.iter().map(|&e| (e, true)).collect();
        for &id in &node.in_edges {
            let Some(edge) = pattern.edge(id) else {
                continue;
            };
            if self.is_bidirectional(edge) && !candidates.iter().any(|(seen, _)| *seen == id) {
                candidates.push((id, false));
            }
        }
        let current_optional = node.optional;
        for (id, outbound) in candidates {
            if self.scheduled[id] {
                continue;
            }
            let Some(edge) = pattern.edge(id) else {
                continue;
            };
            let neighbor = if outbound { &edge.to } else { &edge.from };
            if !self.deps_satisfied(neighbor) {
                continue;
            }
            if self.visited.contains(neighbor) {
                let toward_current = current_optional || self.is_bidirectional(edge);
                let forward = if edge.is_bidirectional() && toward_current {
                    !outbound
                } else {
                    true
                };
                self.record(edge, forward);
                continue;
            }
            if current_optional && !self.is_optional_chain(current, id, neighbor, &mut BTreeSet::new())
            {
                continue;
            }
            let neighbor = neighbor.clone();
            self.record(edge, outbound);
            self.visit(&neighbor);
        }
    }
}

/// Candidate start aliases: estimated ones by ascending estimate (ties by
/// alias), then the others in declaration order. Optional aliases never start.
fn start_order(pattern: &Pattern, estimates: &BTreeMap<String, u64>) -> Vec<String> {
    let mut estimated: Vec<(u64, &str)> = pattern
        .nodes()
        .iter()
        .filter(|node| !node.optional)
        .filter_map(|node| estimates.get(&node.alias).map(|e| (*e, node.alias.as_str())))
        .collect();
    estimated.sort();
    let mut order: Vec<String> = estimated.into_iter().map(|(_, a)| a.to_owned()).collect();
    for node in pattern.nodes() {
        if !node.optional && !order.contains(&node.alias) {
            order.push(node.alias.clone());
        }
    }
    order
}

/// Schedules every edge of the connected `pattern`.
///
/// `dependencies` maps an alias to the aliases its filter reads through
/// `$matched`; such an alias is only reached once they are bound.
pub fn schedule(
    pattern: &Pattern,
    estimates: &BTreeMap<String, u64>,
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Schedule> {
    let mut state = SchedulerState {
        pattern,
        remaining_deps: pattern
            .nodes()
            .iter()
            .map(|node| {
                let mut deps = dependencies.get(&node.alias).cloned().unwrap_or_default();
                deps.remove(&node.alias);
                (node.alias.clone(), deps)
            })
            .collect(),
        visited: BTreeSet::new(),
        scheduled: vec![false; pattern.num_edges()],
        traversals: Vec::with_capacity(pattern.num_edges()),
    };
    let order = start_order(pattern, estimates);
    let mut starts: Vec<String> = Vec::new();
    while starts.is_empty() || state.traversals.len() < pattern.num_edges() {
        let start = order
            .iter()
            .find(|alias| !state.visited.contains(*alias) && state.deps_satisfied(alias))
            .cloned();
        let Some(start) = start else {
            return Err(QuarryError::ScheduleUnsatisfiable(format!(
                "no start alias among {:?}: circular $matched dependency or only optional nodes left",
                pattern.aliases().filter(|a| !state.visited.contains(*a)).collect::<Vec<_>>()
            )));
        };
        state.visit(&start);
        starts.push(start);
    }
    if state.traversals.len() != pattern.num_edges() {
        return Err(QuarryError::internal(format!(
            "schedule has {} entries for {} edges",
            state.traversals.len(),
            pattern.num_edges()
        )));
    }
    debug!(
        starts = ?starts,
        edges = state.traversals.len(),
        "pattern.scheduled"
    );
    Ok(Schedule {
        starts,
        traversals: state.traversals,
    })
}
