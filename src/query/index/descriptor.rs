//! Index search descriptors and the key ranges they scan.

use std::fmt;
use std::sync::Arc;

use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::expr::{CmpOp, Condition};
use crate::query::index::aware::is_range_condition;
use crate::query::value::Value;
use crate::storage::{Index, IndexKey, IndexStatKey};

/// One index scan bound pair.
///
/// An empty `from` (or `to`) leaves that end open; a shorter key bounds only the
/// leading fields.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyRange {
    /// Lower bound.
    pub from: IndexKey,
    /// Lower bound is inclusive.
    pub from_inclusive: bool,
    /// Upper bound.
    pub to: IndexKey,
    /// Upper bound is inclusive.
    pub to_inclusive: bool,
}

impl KeyRange {
    /// Both ends evaluate to null: served by the null-key bucket.
    pub fn is_null_scan(&self) -> bool {
        self.from.is_null() && self.to.is_null()
    }

    /// A single key, both ends inclusive.
    pub fn is_point(&self) -> bool {
        self.from == self.to && self.from_inclusive && self.to_inclusive
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}, {}{}",
            if self.from_inclusive { "[" } else { "(" },
            self.from,
            self.to,
            if self.to_inclusive { "]" } else { ")" }
        )
    }
}

/// Bounds contributed by one key condition for one field.
#[derive(Clone, Debug)]
struct FieldBound {
    from: Option<Value>,
    from_inclusive: bool,
    to: Option<Value>,
    to_inclusive: bool,
}

impl FieldBound {
    fn point(value: Value) -> Self {
        Self {
            from: Some(value.clone()),
            from_inclusive: true,
            to: Some(value),
            to_inclusive: true,
        }
    }

    fn apply(&mut self, op: CmpOp, value: Value) {
        if op.is_lower_bound() {
            self.from = Some(value);
            self.from_inclusive = op.is_inclusive();
        } else if op.is_upper_bound() {
            self.to = Some(value);
            self.to_inclusive = op.is_inclusive();
        }
    }
}

fn field_bounds(condition: &Condition, ctx: &ExecutionContext) -> Result<Vec<FieldBound>> {
    match condition {
        Condition::Compare { op, right, .. } if op.is_range() => {
            let mut bound = FieldBound {
                from: None,
                from_inclusive: true,
                to: None,
                to_inclusive: true,
            };
            bound.apply(*op, right.eval_early(ctx)?);
            Ok(vec![bound])
        }
        Condition::Compare {
            op: CmpOp::Eq | CmpOp::Contains | CmpOp::ContainsKey | CmpOp::ContainsValue,
            right,
            ..
        }
        | Condition::ContainsText { right, .. } => Ok(vec![FieldBound::point(right.eval_early(ctx)?)]),
        Condition::In { right, .. } => Ok(right
            .eval_early(ctx)?
            .into_elements()
            .into_iter()
            .map(FieldBound::point)
            .collect()),
        Condition::Between { low, high, .. } => Ok(vec![FieldBound {
            from: Some(low.eval_early(ctx)?),
            from_inclusive: true,
            to: Some(high.eval_early(ctx)?),
            to_inclusive: true,
        }]),
        other => Err(QuarryError::UnsupportedCondition(format!(
            "cannot derive an index key from '{other}'"
        ))),
    }
}

/// Builds one key range from a choice of bound per field.
fn assemble(bounds: &[&FieldBound]) -> KeyRange {
    let mut from = Vec::with_capacity(bounds.len());
    let mut to = Vec::with_capacity(bounds.len());
    let mut from_open = false;
    let mut to_open = false;
    for bound in bounds {
        match (&bound.from, from_open) {
            (Some(value), false) => from.push(value.clone()),
            _ => from_open = true,
        }
        match (&bound.to, to_open) {
            (Some(value), false) => to.push(value.clone()),
            _ => to_open = true,
        }
    }
    let last = bounds.last();
    KeyRange {
        from_inclusive: last.map_or(true, |b| b.from.is_none() || b.from_inclusive),
        to_inclusive: last.map_or(true, |b| b.to.is_none() || b.to_inclusive),
        from: IndexKey::new(from),
        to: IndexKey::new(to),
    }
}

/// A planned lookup on one index.
///
/// `key_conditions` bind the index's leading fields in declaration order;
/// `additional_range` is the opposite bound on the last of them; `remaining`
/// must still be checked on every fetched record.
#[derive(Clone, Debug)]
pub struct IndexSearchDescriptor {
    index: Arc<dyn Index>,
    key_conditions: Vec<Condition>,
    additional_range: Option<Condition>,
    remaining: Condition,
}

impl IndexSearchDescriptor {
    /// Creates a descriptor.
    pub fn new(
        index: Arc<dyn Index>,
        key_conditions: Vec<Condition>,
        additional_range: Option<Condition>,
        remaining: Condition,
    ) -> Self {
        Self {
            index,
            key_conditions,
            additional_range,
            remaining,
        }
    }

    /// Unconditioned iteration over the whole index.
    pub fn flat(index: Arc<dyn Index>) -> Self {
        Self::new(index, Vec::new(), None, Condition::True)
    }

    /// Scanned index.
    pub fn index(&self) -> &Arc<dyn Index> {
        &self.index
    }

    /// Conditions bound to the index's leading fields.
    pub fn key_conditions(&self) -> &[Condition] {
        &self.key_conditions
    }

    /// Second bound on the last key field.
    pub fn additional_range(&self) -> Option<&Condition> {
        self.additional_range.as_ref()
    }

    /// Filter still applied to fetched records.
    pub fn remaining(&self) -> &Condition {
        &self.remaining
    }

    /// Replaces the remaining filter.
    pub fn with_remaining(mut self, remaining: Condition) -> Self {
        self.remaining = remaining;
        self
    }

    /// Number of index fields bound.
    pub fn field_count(&self) -> usize {
        self.key_conditions.len()
    }

    /// No key conditions: the whole index is iterated.
    pub fn is_flat(&self) -> bool {
        self.key_conditions.is_empty()
    }

    /// Statistics key describing the shape of this lookup.
    pub fn stat_key(&self) -> IndexStatKey {
        IndexStatKey::new(
            self.index.name(),
            self.key_conditions.len(),
            self.key_conditions.last().is_some_and(is_range_condition),
            self.additional_range.is_some(),
        )
    }

    /// Expected number of entries, `u64::MAX` when never observed.
    pub fn cost(&self, ctx: &ExecutionContext) -> u64 {
        ctx.database()
            .stats()
            .index_stat(&self.stat_key())
            .unwrap_or(u64::MAX)
    }

    /// The same record may be produced more than once.
    pub fn requires_distinct(&self) -> bool {
        self.index.definition().multi_value
            || self
                .key_conditions
                .iter()
                .any(|cond| matches!(cond, Condition::In { .. }))
    }

    /// Index order already satisfies an ORDER BY on `order_fields`.
    ///
    /// Leading fields bound by equality may be skipped by the ORDER BY.
    pub fn fully_sorted(&self, order_fields: &[&str]) -> bool {
        let definition = self.index.definition();
        if !definition.supports_ordered_iteration() || definition.multi_value || order_fields.is_empty()
        {
            return false;
        }
        let fields = definition.field_names();
        let equal_prefix = self
            .key_conditions
            .iter()
            .take_while(|cond| matches!(cond, Condition::Compare { op: CmpOp::Eq, .. }))
            .count();
        (0..=equal_prefix.min(fields.len())).any(|skip| fields[skip..].starts_with(order_fields))
    }

    /// Positional prefix test on key conditions; a descriptor is a prefix of itself.
    pub fn is_prefix_of(&self, other: &IndexSearchDescriptor) -> bool {
        self.key_conditions.len() <= other.key_conditions.len()
            && self
                .key_conditions
                .iter()
                .zip(&other.key_conditions)
                .all(|(a, b)| a == b)
    }

    /// Same key conditions (in any order) and the same additional range.
    pub fn is_same_condition(&self, other: &IndexSearchDescriptor) -> bool {
        self.key_conditions.len() == other.key_conditions.len()
            && self
                .key_conditions
                .iter()
                .all(|cond| other.key_conditions.contains(cond))
            && self.additional_range == other.additional_range
    }

    /// Key ranges to scan, one per combination of multi-valued operands,
    /// without duplicates. Empty for flat iteration.
    pub fn key_ranges(&self, ctx: &ExecutionContext) -> Result<Vec<KeyRange>> {
        if self.key_conditions.is_empty() {
            return Ok(Vec::new());
        }
        let mut per_field = Vec::with_capacity(self.key_conditions.len());
        for condition in &self.key_conditions {
            per_field.push(field_bounds(condition, ctx)?);
        }
        if let Some(Condition::Compare { op, right, .. }) = &self.additional_range {
            let value = right.eval_early(ctx)?;
            if let Some(last) = per_field.last_mut() {
                for bound in last.iter_mut() {
                    bound.apply(*op, value.clone());
                }
            }
        }
        let mut ranges: Vec<KeyRange> = Vec::new();
        let mut cursor = vec![0usize; per_field.len()];
        if per_field.iter().any(Vec::is_empty) {
            return Ok(ranges);
        }
        loop {
            let picked: Vec<&FieldBound> = cursor
                .iter()
                .zip(&per_field)
                .map(|(idx, bounds)| &bounds[*idx])
                .collect();
            let range = assemble(&picked);
            if !ranges.contains(&range) {
                ranges.push(range);
            }
            let mut level = per_field.len();
            loop {
                if level == 0 {
                    return Ok(ranges);
                }
                level -= 1;
                cursor[level] += 1;
                if cursor[level] < per_field[level].len() {
                    break;
                }
                cursor[level] = 0;
            }
        }
    }
}

impl fmt::Display for IndexSearchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index.name())?;
        if !self.key_conditions.is_empty() {
            f.write_str(" ON ")?;
            for (idx, cond) in self.key_conditions.iter().enumerate() {
                if idx > 0 {
                    f.write_str(" AND ")?;
                }
                write!(f, "{cond}")?;
            }
        }
        if let Some(range) = &self.additional_range {
            write!(f, " AND {range}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{IndexDefinition, MemoryDatabase, MemoryIndex};

    fn ordered(fields: &[&str]) -> Arc<dyn Index> {
        Arc::new(MemoryIndex::new(IndexDefinition::ordered("idx", "T", fields)))
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(MemoryDatabase::new().database())
    }

    #[test]
    fn exclusive_and_inclusive_range_bounds() -> Result<()> {
        let ctx = ctx();
        let exclusive = IndexSearchDescriptor::new(
            ordered(&["x"]),
            vec![Condition::gt("x", 5)],
            Some(Condition::lt("x", 10)),
            Condition::True,
        );
        let ranges = exclusive.key_ranges(&ctx)?;
        assert_eq!(ranges.len(), 1);
        assert_eq!((&ranges[0].from, ranges[0].from_inclusive), (&IndexKey::single(5), false));
        assert_eq!((&ranges[0].to, ranges[0].to_inclusive), (&IndexKey::single(10), false));

        let inclusive = IndexSearchDescriptor::new(
            ordered(&["x"]),
            vec![Condition::ge("x", 5)],
            Some(Condition::le("x", 10)),
            Condition::True,
        );
        let range = &inclusive.key_ranges(&ctx)?[0];
        assert!(range.from_inclusive && range.to_inclusive);
        Ok(())
    }

    #[test]
    fn in_list_expands_and_deduplicates() -> Result<()> {
        let desc = IndexSearchDescriptor::new(
            ordered(&["x"]),
            vec![Condition::in_list("x", [1, 2, 3, 2])],
            None,
            Condition::True,
        );
        let ranges = desc.key_ranges(&ctx())?;
        assert_eq!(ranges.len(), 3);
        assert!(ranges.iter().all(KeyRange::is_point));
        assert!(desc.requires_distinct());
        Ok(())
    }

    #[test]
    fn composite_prefix_with_open_upper_end() -> Result<()> {
        let desc = IndexSearchDescriptor::new(
            ordered(&["a", "b"]),
            vec![Condition::eq("a", 1), Condition::gt("b", 2)],
            None,
            Condition::True,
        );
        let range = &desc.key_ranges(&ctx())?[0];
        assert_eq!(range.from, IndexKey::new([Value::Int(1), Value::Int(2)]));
        assert!(!range.from_inclusive);
        assert_eq!(range.to, IndexKey::single(1));
        assert!(range.to_inclusive);
        assert_eq!(desc.stat_key(), IndexStatKey::new("idx", 2, true, false));
        Ok(())
    }

    #[test]
    fn prefix_is_positional() {
        let index = ordered(&["a", "b"]);
        let short = IndexSearchDescriptor::new(
            Arc::clone(&index),
            vec![Condition::eq("a", 1)],
            None,
            Condition::True,
        );
        let long = IndexSearchDescriptor::new(
            Arc::clone(&index),
            vec![Condition::eq("a", 1), Condition::eq("b", 2)],
            None,
            Condition::True,
        );
        let swapped = IndexSearchDescriptor::new(
            index,
            vec![Condition::eq("b", 2), Condition::eq("a", 1)],
            None,
            Condition::True,
        );
        assert!(short.is_prefix_of(&long));
        assert!(short.is_prefix_of(&short));
        assert!(!short.is_prefix_of(&swapped));
        assert!(!long.is_prefix_of(&swapped));
        assert!(long.is_same_condition(&swapped));
    }

    #[test]
    fn sortedness_skips_equality_bound_fields() {
        let desc = IndexSearchDescriptor::new(
            ordered(&["a", "b"]),
            vec![Condition::eq("a", 1)],
            None,
            Condition::True,
        );
        assert!(desc.fully_sorted(&["b"]));
        assert!(desc.fully_sorted(&["a", "b"]));
        assert!(!desc.fully_sorted(&["c"]));
        assert!(IndexSearchDescriptor::flat(ordered(&["a"])).fully_sorted(&["a"]));
    }

    #[test]
    fn unknown_cost_is_maximal() {
        let desc = IndexSearchDescriptor::flat(ordered(&["a"]));
        assert_eq!(desc.cost(&ctx()), u64::MAX);
    }
}
