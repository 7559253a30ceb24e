//! Parsed statement model consumed by the planners.
//!
//! Parsing text is someone else's job; statements arrive as these values,
//! usually assembled with the builder methods below.

use std::fmt;

use crate::query::expr::{Condition, Expr};
use crate::query::pattern::model::EdgeMethod;
use crate::query::steps::{OrderItem, ProjectionItem};
use crate::query::tuple::Tuple;
use crate::storage::Direction;
use crate::types::Rid;

/// Where a statement reads its records from.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    /// Every record of a type and its subtypes.
    Type(String),
    /// Named clusters.
    Clusters(Vec<String>),
    /// Explicit record ids.
    Rids(Vec<Rid>),
    /// In-memory rows.
    Values(Vec<Tuple>),
    /// Output of another statement.
    Subquery(Box<Statement>),
}

impl Target {
    /// Type target.
    pub fn type_name(name: impl Into<String>) -> Self {
        Target::Type(name.into())
    }
}

/// SELECT.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectStatement {
    /// Source of records.
    pub target: Target,
    /// WHERE clause.
    pub predicate: Option<Condition>,
    /// Output columns; the records themselves when empty.
    pub projections: Vec<ProjectionItem>,
    /// DISTINCT over the projected rows.
    pub distinct: bool,
    /// ORDER BY keys.
    pub order_by: Vec<OrderItem>,
    /// SKIP.
    pub skip: Option<usize>,
    /// LIMIT.
    pub limit: Option<usize>,
    /// TIMEOUT in milliseconds; the configured default applies when absent.
    pub timeout_ms: Option<u64>,
}

impl SelectStatement {
    /// `SELECT FROM target`.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            predicate: None,
            projections: Vec::new(),
            distinct: false,
            order_by: Vec::new(),
            skip: None,
            limit: None,
            timeout_ms: None,
        }
    }

    /// `SELECT FROM type_name`.
    pub fn from_type(type_name: impl Into<String>) -> Self {
        Self::new(Target::Type(type_name.into()))
    }

    /// Sets the WHERE clause.
    pub fn filter(mut self, predicate: Condition) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Adds an output column.
    pub fn project(mut self, item: ProjectionItem) -> Self {
        self.projections.push(item);
        self
    }

    /// Enables DISTINCT.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Adds an ORDER BY key.
    pub fn order_by(mut self, item: OrderItem) -> Self {
        self.order_by.push(item);
        self
    }

    /// Sets SKIP.
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sets LIMIT.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets TIMEOUT.
    pub fn timeout_ms(mut self, limit_ms: u64) -> Self {
        self.timeout_ms = Some(limit_ms);
        self
    }
}

/// Constraints on one pattern node, written `{type: T, as: a, where: (...)}`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeFilter {
    /// Binding name; generated when absent.
    pub alias: Option<String>,
    /// Required type, polymorphically.
    pub type_name: Option<String>,
    /// Required cluster name.
    pub cluster: Option<String>,
    /// Required record id.
    pub rid: Option<Rid>,
    /// Per-node condition; may read `$matched`.
    pub filter: Option<Condition>,
    /// The node may fail to match.
    pub optional: bool,
}

impl NodeFilter {
    /// Node bound to `alias`.
    pub fn alias(alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            ..Self::default()
        }
    }

    /// Node without a user alias.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Restricts to a type.
    pub fn of_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Restricts to a cluster.
    pub fn in_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Restricts to one record.
    pub fn with_rid(mut self, rid: Rid) -> Self {
        self.rid = Some(rid);
        self
    }

    /// Adds a condition, AND-ed with any existing one.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => Condition::and_all(vec![existing, condition]),
            None => condition,
        });
        self
    }

    /// Marks the node optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// One hop of a path expression.
#[derive(Clone, Debug, PartialEq)]
pub struct PathItem {
    /// How to move.
    pub method: EdgeMethod,
    /// Node reached.
    pub target: NodeFilter,
    /// Keep hopping while this holds for the reached node.
    pub while_condition: Option<Condition>,
    /// Maximum number of hops.
    pub max_depth: Option<usize>,
}

impl PathItem {
    /// Single hop.
    pub fn new(method: EdgeMethod, target: NodeFilter) -> Self {
        Self {
            method,
            target,
            while_condition: None,
            max_depth: None,
        }
    }

    /// Multi-hop continuation condition.
    pub fn while_(mut self, condition: Condition) -> Self {
        self.while_condition = Some(condition);
        self
    }

    /// Multi-hop depth bound.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

/// `{origin}.hop{node}.hop{node}...`
#[derive(Clone, Debug, PartialEq)]
pub struct MatchExpression {
    /// First node.
    pub origin: NodeFilter,
    /// Following hops.
    pub items: Vec<PathItem>,
}

impl MatchExpression {
    /// Expression starting at `origin`.
    pub fn new(origin: NodeFilter) -> Self {
        Self {
            origin,
            items: Vec::new(),
        }
    }

    /// Appends a single hop.
    pub fn then(mut self, method: EdgeMethod, target: NodeFilter) -> Self {
        self.items.push(PathItem::new(method, target));
        self
    }

    /// Appends a hop built by the caller.
    pub fn then_item(mut self, item: PathItem) -> Self {
        self.items.push(item);
        self
    }

    /// Every node of the expression, origin first.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeFilter> {
        std::iter::once(&self.origin).chain(self.items.iter().map(|item| &item.target))
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut NodeFilter> {
        std::iter::once(&mut self.origin).chain(self.items.iter_mut().map(|item| &mut item.target))
    }
}

/// What a MATCH statement returns.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchReturn {
    /// `RETURN $patterns`: one column per user alias.
    Patterns,
    /// Explicit columns over the matched row.
    Items(Vec<ProjectionItem>),
}

/// MATCH.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchStatement {
    /// Positive path expressions.
    pub expressions: Vec<MatchExpression>,
    /// `NOT` path expressions; rows matching any of them are dropped.
    pub not_expressions: Vec<MatchExpression>,
    /// RETURN clause.
    pub returns: MatchReturn,
    /// DISTINCT over the returned rows.
    pub distinct: bool,
    /// ORDER BY keys over the returned rows.
    pub order_by: Vec<OrderItem>,
    /// SKIP.
    pub skip: Option<usize>,
    /// LIMIT.
    pub limit: Option<usize>,
}

impl MatchStatement {
    /// MATCH with no expressions yet, returning `$patterns`.
    pub fn new() -> Self {
        Self {
            expressions: Vec::new(),
            not_expressions: Vec::new(),
            returns: MatchReturn::Patterns,
            distinct: false,
            order_by: Vec::new(),
            skip: None,
            limit: None,
        }
    }

    /// Adds a positive expression.
    pub fn expression(mut self, expression: MatchExpression) -> Self {
        self.expressions.push(expression);
        self
    }

    /// Adds a NOT expression.
    pub fn not(mut self, expression: MatchExpression) -> Self {
        self.not_expressions.push(expression);
        self
    }

    /// Returns explicit columns.
    pub fn returning(mut self, items: Vec<ProjectionItem>) -> Self {
        self.returns = MatchReturn::Items(items);
        self
    }

    /// Enables DISTINCT.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Adds an ORDER BY key.
    pub fn order_by(mut self, item: OrderItem) -> Self {
        self.order_by.push(item);
        self
    }

    /// Sets SKIP.
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sets LIMIT.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Default for MatchStatement {
    fn default() -> Self {
        Self::new()
    }
}

/// What a traversal follows from each visited record.
#[derive(Clone, Debug, PartialEq)]
pub enum TraverseProjection {
    /// Graph edges in a direction, restricted to labels when non-empty.
    Edges(Direction, Vec<String>),
    /// Any expression yielding record ids, lists, maps or nested rows.
    Expr(Expr),
}

impl TraverseProjection {
    /// `out(labels)`.
    pub fn out<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        TraverseProjection::Edges(Direction::Out, labels.into_iter().map(Into::into).collect())
    }

    /// `in(labels)`.
    pub fn inbound<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        TraverseProjection::Edges(Direction::In, labels.into_iter().map(Into::into).collect())
    }

    /// `both(labels)`.
    pub fn both<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Self {
        TraverseProjection::Edges(Direction::Both, labels.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for TraverseProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraverseProjection::Edges(direction, labels) => {
                let quoted: Vec<String> = labels.iter().map(|l| format!("'{l}'")).collect();
                write!(f, "{direction}({})", quoted.join(", "))
            }
            TraverseProjection::Expr(expr) => write!(f, "{expr}"),
        }
    }
}

/// Walk order of a traversal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraverseStrategy {
    /// Deepest branch first.
    #[default]
    DepthFirst,
    /// Level by level.
    BreadthFirst,
}

/// TRAVERSE.
#[derive(Clone, Debug, PartialEq)]
pub struct TraverseStatement {
    /// Seed records.
    pub target: Target,
    /// What to follow from each record.
    pub projections: Vec<TraverseProjection>,
    /// Records are admitted while this holds.
    pub while_condition: Option<Condition>,
    /// Records deeper than this are not expanded.
    pub max_depth: Option<usize>,
    /// Walk order.
    pub strategy: TraverseStrategy,
    /// LIMIT.
    pub limit: Option<usize>,
}

impl TraverseStatement {
    /// Depth-first traversal of `target` following `projection`.
    pub fn new(target: Target, projection: TraverseProjection) -> Self {
        Self {
            target,
            projections: vec![projection],
            while_condition: None,
            max_depth: None,
            strategy: TraverseStrategy::DepthFirst,
            limit: None,
        }
    }

    /// Follows another projection too.
    pub fn also(mut self, projection: TraverseProjection) -> Self {
        self.projections.push(projection);
        self
    }

    /// Sets the while-condition.
    pub fn while_(mut self, condition: Condition) -> Self {
        self.while_condition = Some(condition);
        self
    }

    /// Sets the depth bound.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Walks breadth first.
    pub fn breadth_first(mut self) -> Self {
        self.strategy = TraverseStrategy::BreadthFirst;
        self
    }

    /// Sets LIMIT.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Any plannable statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// SELECT.
    Select(SelectStatement),
    /// MATCH.
    Match(MatchStatement),
    /// TRAVERSE.
    Traverse(TraverseStatement),
}

impl From<SelectStatement> for Statement {
    fn from(statement: SelectStatement) -> Self {
        Statement::Select(statement)
    }
}

impl From<MatchStatement> for Statement {
    fn from(statement: MatchStatement) -> Self {
        Statement::Match(statement)
    }
}

impl From<TraverseStatement> for Statement {
    fn from(statement: TraverseStatement) -> Self {
        Statement::Traverse(statement)
    }
}
