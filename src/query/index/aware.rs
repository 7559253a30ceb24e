//! Which conditions an index field can answer.

use crate::query::expr::{CmpOp, Condition, Expr};
use crate::storage::{IndexDefinition, IndexField, MapKeyMode};

/// What the selector knows about one index field while matching conditions.
#[derive(Clone, Copy, Debug)]
pub struct IndexSearchInfo<'a> {
    /// Property name.
    pub field: &'a str,
    /// The index is ordered, so range operators can be answered.
    pub allows_range: bool,
    /// Collection elements are indexed individually.
    pub multi_value: bool,
    /// Map sub-index mode, if the field is a map.
    pub map_mode: Option<MapKeyMode>,
}

impl<'a> IndexSearchInfo<'a> {
    /// Search info for `field` of `definition`.
    pub fn new(definition: &IndexDefinition, field: &'a IndexField) -> Self {
        Self {
            field: &field.name,
            allows_range: definition.supports_ordered_iteration(),
            multi_value: definition.multi_value,
            map_mode: field.map_mode,
        }
    }

    fn is_field(&self, expr: &Expr) -> bool {
        expr.as_property() == Some(self.field)
    }
}

/// Returns true when `condition` can be turned into a key bound on the field.
pub fn is_index_aware(condition: &Condition, info: &IndexSearchInfo<'_>) -> bool {
    match condition {
        Condition::Compare { left, op, right } => {
            if !info.is_field(left) || !right.is_early_calculated() {
                return false;
            }
            match op {
                CmpOp::Eq => info.map_mode.is_none(),
                CmpOp::ContainsKey => info.map_mode == Some(MapKeyMode::ByKey),
                CmpOp::ContainsValue => info.map_mode == Some(MapKeyMode::ByValue),
                CmpOp::Contains => info.multi_value && info.map_mode.is_none(),
                op if op.is_range() => info.allows_range && info.map_mode.is_none(),
                _ => false,
            }
        }
        Condition::In { left, right } => {
            info.is_field(left) && right.is_early_calculated() && info.map_mode.is_none()
        }
        Condition::Between { expr, low, high } => {
            info.allows_range
                && info.map_mode.is_none()
                && info.is_field(expr)
                && low.is_early_calculated()
                && high.is_early_calculated()
        }
        _ => false,
    }
}

/// Returns true when `condition` is a text search a full-text index on `field` answers.
pub fn is_full_text_aware(condition: &Condition, field: &str) -> bool {
    match condition {
        Condition::ContainsText { left, right } => {
            left.as_property() == Some(field) && right.is_early_calculated()
        }
        _ => false,
    }
}

/// Returns true for conditions bounding only one side of a range.
pub fn is_range_condition(condition: &Condition) -> bool {
    matches!(condition, Condition::Compare { op, .. } if op.is_range())
        || matches!(condition, Condition::Between { .. })
}

/// Returns true when `other` bounds the opposite side of the same field as `first`,
/// so both can be answered by a single range scan.
pub fn is_range_partner(first: &Condition, other: &Condition) -> bool {
    let (
        Condition::Compare {
            left: l1,
            op: op1,
            ..
        },
        Condition::Compare {
            left: l2,
            op: op2,
            right: r2,
        },
    ) = (first, other)
    else {
        return false;
    };
    if l1 != l2 || !r2.is_early_calculated() {
        return false;
    }
    (op1.is_lower_bound() && op2.is_upper_bound()) || (op1.is_upper_bound() && op2.is_lower_bound())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_operators_need_matching_sub_index() {
        let plain = IndexDefinition::ordered("idx", "T", &["tags"]);
        let by_key = IndexDefinition::ordered("idx", "T", &["tags"])
            .with_map_mode("tags", MapKeyMode::ByKey);
        let contains_key = Condition::compare(Expr::prop("tags"), CmpOp::ContainsKey, Expr::lit("k"));
        let contains_value =
            Condition::compare(Expr::prop("tags"), CmpOp::ContainsValue, Expr::lit("v"));

        let plain_info = IndexSearchInfo::new(&plain, &plain.fields[0]);
        assert!(!is_index_aware(&contains_key, &plain_info));
        assert!(!is_index_aware(&contains_value, &plain_info));

        let key_info = IndexSearchInfo::new(&by_key, &by_key.fields[0]);
        assert!(is_index_aware(&contains_key, &key_info));
        assert!(!is_index_aware(&contains_value, &key_info));
        assert!(!is_index_aware(&Condition::eq("tags", "k"), &key_info));
    }

    #[test]
    fn ranges_need_ordered_index_and_constant_operand() {
        let ordered = IndexDefinition::ordered("o", "T", &["x"]);
        let hash = IndexDefinition::hash("h", "T", &["x"]);
        let gt = Condition::gt("x", 5);
        assert!(is_index_aware(&gt, &IndexSearchInfo::new(&ordered, &ordered.fields[0])));
        assert!(!is_index_aware(&gt, &IndexSearchInfo::new(&hash, &hash.fields[0])));
        assert!(is_index_aware(
            &Condition::eq("x", 1),
            &IndexSearchInfo::new(&hash, &hash.fields[0])
        ));

        let dependent = Condition::compare(Expr::prop("x"), CmpOp::Eq, Expr::prop("y"));
        assert!(!is_index_aware(&dependent, &IndexSearchInfo::new(&ordered, &ordered.fields[0])));
        assert!(!is_index_aware(&Condition::ne("x", 1), &IndexSearchInfo::new(&ordered, &ordered.fields[0])));
    }

    #[test]
    fn range_partners_bound_opposite_sides() {
        assert!(is_range_partner(&Condition::gt("x", 1), &Condition::le("x", 9)));
        assert!(is_range_partner(&Condition::lt("x", 9), &Condition::ge("x", 1)));
        assert!(!is_range_partner(&Condition::gt("x", 1), &Condition::ge("x", 2)));
        assert!(!is_range_partner(&Condition::gt("x", 1), &Condition::lt("y", 2)));
    }

    #[test]
    fn full_text_matches_field() {
        let cond = Condition::ContainsText {
            left: Expr::prop("body"),
            right: Expr::lit("quick fox"),
        };
        assert!(is_full_text_aware(&cond, "body"));
        assert!(!is_full_text_aware(&cond, "title"));
        assert!(!is_full_text_aware(&Condition::eq("body", "x"), "body"));
    }
}
