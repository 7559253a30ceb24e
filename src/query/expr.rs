//! Expression and condition model.
//!
//! Statements arrive already parsed into these closed enums; every planner
//! and executor algorithm dispatches over them with a single `match`.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::tuple::Tuple;
use crate::query::value::Value;

/// Metadata variables owned by traversal and pattern steps.
const TUPLE_VARIABLES: [&str; 4] = ["$depth", "$path", "$stack", "$current"];

/// Value-producing expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(Value),
    /// Property of the current tuple.
    Property(String),
    /// Property reached through a link or nested value.
    Field(Box<Expr>, String),
    /// `@rid` of the current tuple.
    Rid,
    /// `@class` of the current tuple.
    TypeName,
    /// `$name`: tuple metadata first, then context variables.
    Variable(String),
    /// `$matched.alias`: a binding of the partial pattern row.
    Matched(String),
    /// `:name` statement parameter.
    Parameter(String),
    /// Collection literal.
    List(Vec<Expr>),
}

impl Expr {
    /// Property reference.
    pub fn prop(name: impl Into<String>) -> Self {
        Expr::Property(name.into())
    }

    /// Constant.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Context or metadata variable; a leading `$` is added when missing.
    pub fn var(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.starts_with('$') {
            Expr::Variable(name)
        } else {
            Expr::Variable(format!("${name}"))
        }
    }

    /// `$matched.alias` reference.
    pub fn matched(alias: impl Into<String>) -> Self {
        Expr::Matched(alias.into())
    }

    /// Statement parameter.
    pub fn param(name: impl Into<String>) -> Self {
        Expr::Parameter(name.into())
    }

    /// Navigates from `self` to one of its properties.
    pub fn field(self, name: impl Into<String>) -> Self {
        Expr::Field(Box::new(self), name.into())
    }

    /// Collection of constants.
    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Expr::List(values.into_iter().map(|v| Expr::Literal(v.into())).collect())
    }

    /// The property name when this is a bare property reference.
    pub fn as_property(&self) -> Option<&str> {
        match self {
            Expr::Property(name) => Some(name),
            _ => None,
        }
    }

    /// Returns true when the value does not depend on the current tuple.
    pub fn is_early_calculated(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Parameter(_) => true,
            Expr::Variable(name) => !TUPLE_VARIABLES.contains(&name.as_str()),
            Expr::List(items) => items.iter().all(Expr::is_early_calculated),
            Expr::Property(_)
            | Expr::Field(..)
            | Expr::Rid
            | Expr::TypeName
            | Expr::Matched(_) => false,
        }
    }

    /// Evaluates without a current tuple; only valid for early-calculated expressions.
    pub fn eval_early(&self, ctx: &ExecutionContext) -> Result<Value> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Parameter(name) => ctx
                .parameter(name)
                .cloned()
                .ok_or_else(|| QuarryError::Invalid(format!("parameter :{name} is not bound"))),
            Expr::Variable(name) => Ok(ctx.variable(name).cloned().unwrap_or(Value::Null)),
            Expr::List(items) => items
                .iter()
                .map(|item| item.eval_early(ctx))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            other => Err(QuarryError::internal(format!(
                "expression '{other}' needs a current record"
            ))),
        }
    }

    /// Evaluates against `tuple`.
    pub fn eval(&self, tuple: &Tuple, ctx: &ExecutionContext) -> Result<Value> {
        match self {
            Expr::Literal(_) | Expr::Parameter(_) => self.eval_early(ctx),
            Expr::List(items) => items
                .iter()
                .map(|item| item.eval(tuple, ctx))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Expr::Property(name) => tuple.property(name, ctx),
            Expr::Field(base, name) => {
                let base = base.eval(tuple, ctx)?;
                navigate(base, name, ctx)
            }
            Expr::Rid => Ok(tuple.rid().map(Value::Rid).unwrap_or(Value::Null)),
            Expr::TypeName => Ok(tuple
                .type_name(ctx)?
                .map(Value::String)
                .unwrap_or(Value::Null)),
            Expr::Variable(name) => {
                if name == "$current" {
                    return Ok(Value::Tuple(Box::new(tuple.clone())));
                }
                if let Some(value) = tuple.metadata(name) {
                    return Ok(value.clone());
                }
                Ok(ctx.variable(name).cloned().unwrap_or(Value::Null))
            }
            Expr::Matched(alias) => Ok(ctx
                .matched()
                .and_then(|row| row.get(alias))
                .cloned()
                .unwrap_or(Value::Null)),
        }
    }

    /// Collects aliases referenced through `$matched`.
    pub fn matched_aliases(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Matched(alias) => {
                out.insert(alias.clone());
            }
            Expr::Field(base, _) => base.matched_aliases(out),
            Expr::List(items) => items.iter().for_each(|item| item.matched_aliases(out)),
            _ => {}
        }
    }
}

fn navigate(base: Value, name: &str, ctx: &ExecutionContext) -> Result<Value> {
    match base {
        Value::Rid(rid) => Ok(ctx
            .database()
            .records()
            .load(rid)?
            .and_then(|record| record.properties.get(name).cloned())
            .unwrap_or(Value::Null)),
        Value::Tuple(tuple) => tuple.property(name, ctx),
        Value::Map(mut map) => Ok(map.remove(name).unwrap_or(Value::Null)),
        Value::List(items) => items
            .into_iter()
            .map(|item| navigate(item, name, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        _ => Ok(Value::Null),
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Literal(Value::Int(value))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Property(name) => f.write_str(name),
            Expr::Field(base, name) => write!(f, "{base}.{name}"),
            Expr::Rid => f.write_str("@rid"),
            Expr::TypeName => f.write_str("@class"),
            Expr::Variable(name) => f.write_str(name),
            Expr::Matched(alias) => write!(f, "$matched.{alias}"),
            Expr::Parameter(name) => write!(f, ":{name}"),
            Expr::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Binary comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// Collection on the left contains the right value.
    Contains,
    /// Map on the left has the right value as a key.
    ContainsKey,
    /// Map on the left has the right value among its values.
    ContainsValue,
}

impl CmpOp {
    /// `<`, `<=`, `>` and `>=`.
    pub fn is_range(self) -> bool {
        matches!(self, CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge)
    }

    /// `>` and `>=`: bounds the lower end of a range.
    pub fn is_lower_bound(self) -> bool {
        matches!(self, CmpOp::Gt | CmpOp::Ge)
    }

    /// `<` and `<=`: bounds the upper end of a range.
    pub fn is_upper_bound(self) -> bool {
        matches!(self, CmpOp::Lt | CmpOp::Le)
    }

    /// Inclusive bound operators.
    pub fn is_inclusive(self) -> bool {
        matches!(self, CmpOp::Le | CmpOp::Ge | CmpOp::Eq)
    }

    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Contains => "CONTAINS",
            CmpOp::ContainsKey => "CONTAINSKEY",
            CmpOp::ContainsValue => "CONTAINSVALUE",
        }
    }
}

/// Boolean condition.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Always true.
    True,
    /// Always false.
    False,
    /// Conjunction.
    And(Vec<Condition>),
    /// Disjunction.
    Or(Vec<Condition>),
    /// Negation.
    Not(Box<Condition>),
    /// Binary comparison.
    Compare {
        /// Left operand.
        left: Expr,
        /// Operator.
        op: CmpOp,
        /// Right operand.
        right: Expr,
    },
    /// `left IN right`, where `right` evaluates to a collection.
    In {
        /// Probed value.
        left: Expr,
        /// Candidate collection.
        right: Expr,
    },
    /// `expr BETWEEN low AND high`, both ends inclusive.
    Between {
        /// Tested value.
        expr: Expr,
        /// Lower bound.
        low: Expr,
        /// Upper bound.
        high: Expr,
    },
    /// `expr IS NULL`.
    IsNull(Expr),
    /// `expr IS NOT NULL`.
    IsNotNull(Expr),
    /// Every word of `right` occurs in the text of `left`.
    ContainsText {
        /// Text being searched.
        left: Expr,
        /// Words to find.
        right: Expr,
    },
}

impl Condition {
    /// Binary comparison.
    pub fn compare(left: impl Into<Expr>, op: CmpOp, right: impl Into<Expr>) -> Self {
        Condition::Compare {
            left: left.into(),
            op,
            right: right.into(),
        }
    }

    /// `property = value`.
    pub fn eq(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(Expr::prop(property), CmpOp::Eq, Expr::lit(value))
    }

    /// `property <> value`.
    pub fn ne(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(Expr::prop(property), CmpOp::Ne, Expr::lit(value))
    }

    /// `property > value`.
    pub fn gt(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(Expr::prop(property), CmpOp::Gt, Expr::lit(value))
    }

    /// `property >= value`.
    pub fn ge(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(Expr::prop(property), CmpOp::Ge, Expr::lit(value))
    }

    /// `property < value`.
    pub fn lt(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(Expr::prop(property), CmpOp::Lt, Expr::lit(value))
    }

    /// `property <= value`.
    pub fn le(property: &str, value: impl Into<Value>) -> Self {
        Self::compare(Expr::prop(property), CmpOp::Le, Expr::lit(value))
    }

    /// `property IN [values]`.
    pub fn in_list<V: Into<Value>>(property: &str, values: impl IntoIterator<Item = V>) -> Self {
        Condition::In {
            left: Expr::prop(property),
            right: Expr::list(values),
        }
    }

    /// `property BETWEEN low AND high`.
    pub fn between(property: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Condition::Between {
            expr: Expr::prop(property),
            low: Expr::lit(low),
            high: Expr::lit(high),
        }
    }

    /// Conjunction, collapsing trivial cases.
    pub fn and_all(mut parts: Vec<Condition>) -> Self {
        parts.retain(|c| *c != Condition::True);
        if parts.contains(&Condition::False) {
            return Condition::False;
        }
        match parts.len() {
            0 => Condition::True,
            1 => parts.remove(0),
            _ => Condition::And(parts),
        }
    }

    /// Disjunction, collapsing trivial cases.
    pub fn or_all(mut parts: Vec<Condition>) -> Self {
        parts.retain(|c| *c != Condition::False);
        if parts.contains(&Condition::True) {
            return Condition::True;
        }
        match parts.len() {
            0 => Condition::False,
            1 => parts.remove(0),
            _ => Condition::Or(parts),
        }
    }

    /// Negation.
    pub fn negate(self) -> Self {
        match self {
            Condition::True => Condition::False,
            Condition::False => Condition::True,
            Condition::Not(inner) => *inner,
            other => Condition::Not(Box::new(other)),
        }
    }

    /// Evaluates against `tuple`.
    pub fn matches(&self, tuple: &Tuple, ctx: &ExecutionContext) -> Result<bool> {
        match self {
            Condition::True => Ok(true),
            Condition::False => Ok(false),
            Condition::And(parts) => {
                for part in parts {
                    if !part.matches(tuple, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or(parts) => {
                for part in parts {
                    if part.matches(tuple, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not(inner) => Ok(!inner.matches(tuple, ctx)?),
            Condition::Compare { left, op, right } => {
                let left = left.eval(tuple, ctx)?;
                let right = right.eval(tuple, ctx)?;
                Ok(compare_values(&left, *op, &right))
            }
            Condition::In { left, right } => {
                let left = left.eval(tuple, ctx)?;
                let right = right.eval(tuple, ctx)?;
                Ok(right
                    .into_elements()
                    .iter()
                    .any(|candidate| candidate.sql_eq(&left)))
            }
            Condition::Between { expr, low, high } => {
                let value = expr.eval(tuple, ctx)?;
                let low = low.eval(tuple, ctx)?;
                let high = high.eval(tuple, ctx)?;
                Ok(compare_values(&value, CmpOp::Ge, &low)
                    && compare_values(&value, CmpOp::Le, &high))
            }
            Condition::IsNull(expr) => Ok(expr.eval(tuple, ctx)?.is_null()),
            Condition::IsNotNull(expr) => Ok(!expr.eval(tuple, ctx)?.is_null()),
            Condition::ContainsText { left, right } => {
                let text = left.eval(tuple, ctx)?;
                let needle = right.eval(tuple, ctx)?;
                Ok(match (text.as_str(), needle.as_str()) {
                    (Some(text), Some(needle)) => contains_words(text, needle),
                    _ => false,
                })
            }
        }
    }

    /// Rewrites into disjunctive normal form: a list of AND blocks of simple
    /// conditions.
    ///
    /// When the expansion would exceed `max_blocks`, the whole condition is
    /// returned as a single opaque block, which no index can answer.
    pub fn flatten(&self, max_blocks: usize) -> Vec<Vec<Condition>> {
        match self.try_flatten(max_blocks) {
            Some(blocks) => blocks,
            None => vec![vec![self.clone()]],
        }
    }

    fn try_flatten(&self, max_blocks: usize) -> Option<Vec<Vec<Condition>>> {
        match self {
            Condition::True => Some(vec![Vec::new()]),
            Condition::And(parts) => {
                let mut blocks: Vec<Vec<Condition>> = vec![Vec::new()];
                for part in parts {
                    let sub = part.try_flatten(max_blocks)?;
                    if blocks.len().saturating_mul(sub.len()) > max_blocks {
                        return None;
                    }
                    let mut next = Vec::with_capacity(blocks.len() * sub.len());
                    for block in &blocks {
                        for extra in &sub {
                            let mut merged = block.clone();
                            merged.extend(extra.iter().cloned());
                            next.push(merged);
                        }
                    }
                    blocks = next;
                }
                Some(blocks)
            }
            Condition::Or(parts) => {
                let mut blocks = Vec::new();
                for part in parts {
                    blocks.extend(part.try_flatten(max_blocks)?);
                    if blocks.len() > max_blocks {
                        return None;
                    }
                }
                Some(blocks)
            }
            other => Some(vec![vec![other.clone()]]),
        }
    }

    /// Aliases referenced through `$matched`.
    pub fn matched_aliases(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_matched(&mut out);
        out
    }

    fn collect_matched(&self, out: &mut BTreeSet<String>) {
        match self {
            Condition::True | Condition::False => {}
            Condition::And(parts) | Condition::Or(parts) => {
                parts.iter().for_each(|p| p.collect_matched(out))
            }
            Condition::Not(inner) => inner.collect_matched(out),
            Condition::Compare { left, right, .. }
            | Condition::In { left, right }
            | Condition::ContainsText { left, right } => {
                left.matched_aliases(out);
                right.matched_aliases(out);
            }
            Condition::Between { expr, low, high } => {
                expr.matched_aliases(out);
                low.matched_aliases(out);
                high.matched_aliases(out);
            }
            Condition::IsNull(expr) | Condition::IsNotNull(expr) => expr.matched_aliases(out),
        }
    }
}

/// Applies a comparison operator to two evaluated operands.
pub fn compare_values(left: &Value, op: CmpOp, right: &Value) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CmpOp::Eq => left.sql_eq(right),
        CmpOp::Ne => match (left.is_null(), right.is_null()) {
            (false, false) => !left.sql_eq(right),
            (l, r) => l != r,
        },
        CmpOp::Lt => left.sql_cmp(right) == Some(Less),
        CmpOp::Le => matches!(left.sql_cmp(right), Some(Less | Equal)),
        CmpOp::Gt => left.sql_cmp(right) == Some(Greater),
        CmpOp::Ge => matches!(left.sql_cmp(right), Some(Greater | Equal)),
        CmpOp::Contains => match left {
            Value::List(items) => items.iter().any(|item| item.sql_eq(right)),
            _ => false,
        },
        CmpOp::ContainsKey => match (left, right) {
            (Value::Map(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
        CmpOp::ContainsValue => match left {
            Value::Map(map) => map.values().any(|value| value.sql_eq(right)),
            _ => false,
        },
    }
}

fn contains_words(text: &str, needle: &str) -> bool {
    let haystack: BTreeSet<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    needle
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .all(|word| haystack.contains(&word.to_lowercase()))
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::True => f.write_str("true"),
            Condition::False => f.write_str("false"),
            Condition::And(parts) => join(f, parts, " AND "),
            Condition::Or(parts) => {
                f.write_str("(")?;
                join(f, parts, ") OR (")?;
                f.write_str(")")
            }
            Condition::Not(inner) => write!(f, "NOT ({inner})"),
            Condition::Compare { left, op, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
            Condition::In { left, right } => write!(f, "{left} IN {right}"),
            Condition::Between { expr, low, high } => {
                write!(f, "{expr} BETWEEN {low} AND {high}")
            }
            Condition::IsNull(expr) => write!(f, "{expr} IS NULL"),
            Condition::IsNotNull(expr) => write!(f, "{expr} IS NOT NULL"),
            Condition::ContainsText { left, right } => write!(f, "{left} CONTAINSTEXT {right}"),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, parts: &[Condition], sep: &str) -> fmt::Result {
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{part}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_distributes_and_over_or() {
        let cond = Condition::And(vec![
            Condition::eq("a", 1),
            Condition::Or(vec![Condition::eq("b", 2), Condition::eq("c", 3)]),
        ]);
        let blocks = cond.flatten(64);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], vec![Condition::eq("a", 1), Condition::eq("b", 2)]);
        assert_eq!(blocks[1], vec![Condition::eq("a", 1), Condition::eq("c", 3)]);
    }

    #[test]
    fn flatten_gives_up_past_the_bound() {
        let wide = |field: &str| {
            Condition::Or((0..4).map(|i| Condition::eq(field, i)).collect())
        };
        let cond = Condition::And(vec![wide("a"), wide("b"), wide("c")]);
        assert_eq!(cond.flatten(64).len(), 64);
        let blocks = cond.flatten(16);
        assert_eq!(blocks, vec![vec![cond.clone()]]);
    }

    #[test]
    fn trivial_collapsing() {
        assert_eq!(Condition::and_all(vec![]), Condition::True);
        assert_eq!(
            Condition::or_all(vec![Condition::eq("a", 1), Condition::True]),
            Condition::True
        );
        assert_eq!(Condition::eq("a", 1).negate().negate(), Condition::eq("a", 1));
    }

    #[test]
    fn operator_semantics() {
        let map = Value::Map([("k".to_owned(), Value::Int(1))].into_iter().collect());
        assert!(compare_values(&map, CmpOp::ContainsKey, &Value::from("k")));
        assert!(compare_values(&map, CmpOp::ContainsValue, &Value::Int(1)));
        assert!(compare_values(&Value::from(vec![1, 2]), CmpOp::Contains, &Value::Int(2)));
        assert!(!compare_values(&Value::Null, CmpOp::Eq, &Value::Null));
        assert!(compare_values(&Value::Null, CmpOp::Ne, &Value::Int(1)));
        assert!(contains_words("The Quick fox", "quick FOX"));
    }

    #[test]
    fn matched_dependencies() {
        let cond = Condition::compare(
            Expr::prop("age"),
            CmpOp::Gt,
            Expr::matched("a").field("age"),
        );
        assert_eq!(
            cond.matched_aliases().into_iter().collect::<Vec<_>>(),
            vec!["a".to_owned()]
        );
        assert!(!Expr::matched("a").is_early_calculated());
        assert!(Expr::list([1, 2]).is_early_calculated());
    }

    #[test]
    fn display_reads_like_sql() {
        let cond = Condition::And(vec![Condition::eq("a", 1), Condition::between("b", 2, 5)]);
        assert_eq!(cond.to_string(), "a = 1 AND b BETWEEN 2 AND 5");
    }
}
