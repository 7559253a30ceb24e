//! Pattern graph built from MATCH expressions.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::error::{QuarryError, Result};
use crate::query::ast::MatchExpression;
use crate::query::context::ExecutionContext;
use crate::query::expr::Condition;
use crate::query::value::Value;
use crate::storage::Direction;
use crate::types::Rid;

/// How a pattern edge moves from one node to the next.
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeMethod {
    /// Outgoing graph edges with one of the labels (any label when empty).
    Out(Vec<String>),
    /// Incoming graph edges.
    In(Vec<String>),
    /// Edges in either direction.
    Both(Vec<String>),
    /// A link property holding a record id or a list of them.
    Field(String),
}

fn labels<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Vec<String> {
    labels.into_iter().map(Into::into).collect()
}

impl EdgeMethod {
    /// `out(labels)`.
    pub fn out<S: Into<String>>(l: impl IntoIterator<Item = S>) -> Self {
        EdgeMethod::Out(labels(l))
    }

    /// `in(labels)`.
    pub fn inbound<S: Into<String>>(l: impl IntoIterator<Item = S>) -> Self {
        EdgeMethod::In(labels(l))
    }

    /// `both(labels)`.
    pub fn both<S: Into<String>>(l: impl IntoIterator<Item = S>) -> Self {
        EdgeMethod::Both(labels(l))
    }

    /// Follows link property `name`.
    pub fn field(name: impl Into<String>) -> Self {
        EdgeMethod::Field(name.into())
    }

    /// Edges followed regardless of direction.
    pub fn is_undirected(&self) -> bool {
        matches!(self, EdgeMethod::Both(_))
    }

    /// The same edges can be walked backwards.
    pub fn is_reversible(&self) -> bool {
        !matches!(self, EdgeMethod::Field(_))
    }

    /// The method walking the same edges backwards.
    pub fn reversed(&self) -> Option<EdgeMethod> {
        match self {
            EdgeMethod::Out(l) => Some(EdgeMethod::In(l.clone())),
            EdgeMethod::In(l) => Some(EdgeMethod::Out(l.clone())),
            EdgeMethod::Both(l) => Some(EdgeMethod::Both(l.clone())),
            EdgeMethod::Field(_) => None,
        }
    }

    /// Records one hop away from `from`.
    pub fn expand(&self, from: Rid, ctx: &ExecutionContext) -> Result<Vec<Rid>> {
        let records = ctx.database().records();
        match self {
            EdgeMethod::Out(l) => records.neighbors(from, Direction::Out, l),
            EdgeMethod::In(l) => records.neighbors(from, Direction::In, l),
            EdgeMethod::Both(l) => records.neighbors(from, Direction::Both, l),
            EdgeMethod::Field(name) => {
                let Some(record) = records.load(from)? else {
                    return Ok(Vec::new());
                };
                let value = record.properties.get(name).cloned().unwrap_or(Value::Null);
                Ok(value
                    .into_elements()
                    .iter()
                    .filter_map(Value::as_rid)
                    .collect())
            }
        }
    }
}

impl fmt::Display for EdgeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, l) = match self {
            EdgeMethod::Out(l) => ("out", l),
            EdgeMethod::In(l) => ("in", l),
            EdgeMethod::Both(l) => ("both", l),
            EdgeMethod::Field(name) => return write!(f, ".{name}"),
        };
        let quoted: Vec<String> = l.iter().map(|s| format!("'{s}'")).collect();
        write!(f, "{name}({})", quoted.join(", "))
    }
}

/// Directed edge between two aliases.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternEdge {
    /// Position in [`Pattern::edges`].
    pub id: usize,
    /// Alias the edge leaves.
    pub from: String,
    /// Alias the edge reaches.
    pub to: String,
    /// Hop definition.
    pub method: EdgeMethod,
    /// Multi-hop continuation condition.
    pub while_condition: Option<Condition>,
    /// Multi-hop depth bound.
    pub max_depth: Option<usize>,
}

impl PatternEdge {
    /// Edge expands over several hops.
    pub fn is_multi_hop(&self) -> bool {
        self.while_condition.is_some() || self.max_depth.is_some()
    }

    /// Single hop over graph edges, so either end may be the source.
    pub fn is_bidirectional(&self) -> bool {
        self.method.is_reversible() && !self.is_multi_hop()
    }
}

/// One alias of the pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternNode {
    /// Binding name.
    pub alias: String,
    /// Failing to match this node does not fail the row.
    pub optional: bool,
    /// Ids of edges leaving this node.
    pub out_edges: Vec<usize>,
    /// Ids of edges reaching this node.
    pub in_edges: Vec<usize>,
}

/// Nodes and edges of a MATCH statement, in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pattern {
    nodes: Vec<PatternNode>,
    by_alias: BTreeMap<String, usize>,
    edges: Vec<PatternEdge>,
}

impl Pattern {
    /// Creates an empty pattern.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the pattern of `expressions`, whose nodes must all carry an alias.
    pub fn from_expressions(expressions: &[MatchExpression]) -> Result<Self> {
        let mut pattern = Pattern::new();
        for expression in expressions {
            pattern.add_expression(expression)?;
        }
        Ok(pattern)
    }

    /// Adds a node, or returns the existing one with that alias.
    pub fn add_node(&mut self, alias: &str, optional: bool) -> usize {
        if let Some(&idx) = self.by_alias.get(alias) {
            self.nodes[idx].optional |= optional;
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(PatternNode {
            alias: alias.to_owned(),
            optional,
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        });
        self.by_alias.insert(alias.to_owned(), idx);
        idx
    }

    /// Adds an edge between two existing or new aliases and returns its id.
    pub fn add_edge(
        &mut self,
        from: &str,
        to: &str,
        method: EdgeMethod,
        while_condition: Option<Condition>,
        max_depth: Option<usize>,
    ) -> usize {
        let from_idx = self.add_node(from, false);
        let to_idx = self.add_node(to, false);
        let id = self.edges.len();
        self.edges.push(PatternEdge {
            id,
            from: from.to_owned(),
            to: to.to_owned(),
            method,
            while_condition,
            max_depth,
        });
        self.nodes[from_idx].out_edges.push(id);
        self.nodes[to_idx].in_edges.push(id);
        id
    }

    /// Adds the nodes and edges of one path expression.
    pub fn add_expression(&mut self, expression: &MatchExpression) -> Result<()> {
        let alias_of = |alias: &Option<String>| {
            alias
                .clone()
                .ok_or_else(|| QuarryError::internal("pattern node without alias"))
        };
        let mut previous = alias_of(&expression.origin.alias)?;
        self.add_node(&previous, expression.origin.optional);
        for item in &expression.items {
            let next = alias_of(&item.target.alias)?;
            self.add_node(&next, item.target.optional);
            self.add_edge(
                &previous,
                &next,
                item.method.clone(),
                item.while_condition.clone(),
                item.max_depth,
            );
            previous = next;
        }
        Ok(())
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[PatternNode] {
        &self.nodes
    }

    /// Node bound to `alias`.
    pub fn node(&self, alias: &str) -> Option<&PatternNode> {
        self.by_alias.get(alias).map(|&idx| &self.nodes[idx])
    }

    /// Edges in declaration order.
    pub fn edges(&self) -> &[PatternEdge] {
        &self.edges
    }

    /// Edge with id `id`.
    pub fn edge(&self, id: usize) -> Option<&PatternEdge> {
        self.edges.get(id)
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Aliases in declaration order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.alias.as_str())
    }

    /// Splits into connected components, each renumbered from zero.
    pub fn disjoint_patterns(&self) -> Vec<Pattern> {
        let mut component = vec![usize::MAX; self.nodes.len()];
        let mut count = 0;
        for start in 0..self.nodes.len() {
            if component[start] != usize::MAX {
                continue;
            }
            let mut queue = VecDeque::from([start]);
            component[start] = count;
            while let Some(idx) = queue.pop_front() {
                let node = &self.nodes[idx];
                for &edge in node.out_edges.iter().chain(&node.in_edges) {
                    let edge = &self.edges[edge];
                    for alias in [&edge.from, &edge.to] {
                        let Some(&other) = self.by_alias.get(alias.as_str()) else {
                            continue;
                        };
                        if component[other] == usize::MAX {
                            component[other] = count;
                            queue.push_back(other);
                        }
                    }
                }
            }
            count += 1;
        }
        (0..count)
            .map(|c| {
                let mut sub = Pattern::new();
                let members: BTreeSet<&str> = self
                    .nodes
                    .iter()
                    .zip(&component)
                    .filter(|(_, comp)| **comp == c)
                    .map(|(node, _)| node.alias.as_str())
                    .collect();
                for node in self.nodes.iter().filter(|n| members.contains(n.alias.as_str())) {
                    sub.add_node(&node.alias, node.optional);
                }
                for edge in self.edges.iter().filter(|e| members.contains(e.from.as_str())) {
                    sub.add_edge(
                        &edge.from,
                        &edge.to,
                        edge.method.clone(),
                        edge.while_condition.clone(),
                        edge.max_depth,
                    );
                }
                sub
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_are_split_and_renumbered() {
        let mut pattern = Pattern::new();
        pattern.add_edge("a", "b", EdgeMethod::out(["knows"]), None, None);
        pattern.add_edge("c", "d", EdgeMethod::out(["knows"]), None, None);
        pattern.add_edge("b", "e", EdgeMethod::field("owner"), None, None);
        let parts = pattern.disjoint_patterns();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].aliases().collect::<Vec<_>>(), vec!["a", "b", "e"]);
        assert_eq!(parts[0].num_edges(), 2);
        assert_eq!(parts[1].edges()[0].id, 0);
        assert_eq!(parts[1].node("c").map(|n| n.out_edges.clone()), Some(vec![0]));
    }

    #[test]
    fn method_reversal() {
        assert_eq!(EdgeMethod::out(["x"]).reversed(), Some(EdgeMethod::inbound(["x"])));
        assert!(EdgeMethod::field("f").reversed().is_none());
        assert!(EdgeMethod::both(Vec::<String>::new()).is_undirected());
        assert_eq!(EdgeMethod::out(["a", "b"]).to_string(), "out('a', 'b')");
    }
}
