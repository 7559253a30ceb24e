//! Best-index selection for AND blocks of a flattened predicate.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::query::context::ExecutionContext;
use crate::query::expr::{CmpOp, Condition};
use crate::query::index::aware::{
    is_full_text_aware, is_index_aware, is_range_partner, is_range_condition, IndexSearchInfo,
};
use crate::query::index::descriptor::IndexSearchDescriptor;
use crate::query::profile::QueryProfileKind;
use crate::storage::{Index, Schema};

/// Greedily binds the index's fields, left to right, to conditions of `block`.
///
/// A range condition ends the key; its opposite bound, if present, becomes the
/// additional range. Hash indexes must bind every field.
pub fn build_descriptor(index: &Arc<dyn Index>, block: &[Condition]) -> Option<IndexSearchDescriptor> {
    let definition = index.definition();
    if !definition.supports_equality() {
        return None;
    }
    let mut remaining: Vec<Condition> = block.to_vec();
    let mut key_conditions = Vec::new();
    let mut additional_range = None;
    for field in &definition.fields {
        let info = IndexSearchInfo::new(definition, field);
        let Some(pos) = remaining.iter().position(|cond| is_index_aware(cond, &info)) else {
            break;
        };
        let condition = remaining.remove(pos);
        let is_range = is_range_condition(&condition);
        if matches!(&condition, Condition::Compare { op, .. } if op.is_range()) {
            if let Some(partner) = remaining
                .iter()
                .position(|other| is_range_partner(&condition, other))
            {
                additional_range = Some(remaining.remove(partner));
            }
        }
        key_conditions.push(condition);
        if is_range {
            break;
        }
    }
    if key_conditions.is_empty() {
        return None;
    }
    if !definition.supports_ordered_iteration() && key_conditions.len() < definition.fields.len() {
        trace!(index = index.name(), "index.partial_hash_key_rejected");
        return None;
    }
    Some(IndexSearchDescriptor::new(
        Arc::clone(index),
        key_conditions,
        additional_range,
        Condition::and_all(remaining),
    ))
}

/// Binds the first text search on the indexed field of a full-text index.
pub fn build_full_text_descriptor(
    index: &Arc<dyn Index>,
    block: &[Condition],
) -> Option<IndexSearchDescriptor> {
    let definition = index.definition();
    if !definition.is_full_text() {
        return None;
    }
    let field = definition.fields.first()?;
    let pos = block
        .iter()
        .position(|cond| is_full_text_aware(cond, &field.name))?;
    let mut remaining = block.to_vec();
    let key = remaining.remove(pos);
    Some(IndexSearchDescriptor::new(
        Arc::clone(index),
        vec![key],
        None,
        Condition::and_all(remaining),
    ))
}

/// Among descriptors with the same condition, keeps the one whose index is
/// declared on `type_name` itself rather than on a supertype.
pub fn remove_generic_indexes(
    descriptors: Vec<IndexSearchDescriptor>,
    type_name: &str,
) -> Vec<IndexSearchDescriptor> {
    let mut kept: Vec<IndexSearchDescriptor> = Vec::with_capacity(descriptors.len());
    for desc in descriptors {
        match kept.iter().position(|other| desc.is_same_condition(other)) {
            Some(pos) => {
                if desc.index().definition().type_name == type_name {
                    kept.remove(pos);
                    kept.push(desc);
                }
            }
            None => kept.push(desc),
        }
    }
    kept
}

/// Drops descriptors whose key conditions are a positional prefix of another's.
pub fn remove_prefix_indexes(descriptors: Vec<IndexSearchDescriptor>) -> Vec<IndexSearchDescriptor> {
    let mut kept: Vec<IndexSearchDescriptor> = Vec::with_capacity(descriptors.len());
    for desc in descriptors {
        let before = kept.len();
        kept.retain(|other| !other.is_prefix_of(&desc));
        if kept.len() < before || !kept.iter().any(|other| desc.is_prefix_of(other)) {
            kept.push(desc);
        }
    }
    kept
}

/// Best descriptor for one AND block, or `None` when no index applies.
///
/// Candidates are ranked by cost; within the cheapest tier the one binding the
/// most fields wins.
pub fn find_best_index_for(
    ctx: &ExecutionContext,
    indexes: &[Arc<dyn Index>],
    block: &[Condition],
    type_name: &str,
) -> Option<IndexSearchDescriptor> {
    let mut candidates: Vec<IndexSearchDescriptor> = indexes
        .iter()
        .filter_map(|index| build_descriptor(index, block))
        .collect();
    candidates.extend(
        indexes
            .iter()
            .filter_map(|index| build_full_text_descriptor(index, block)),
    );
    let candidates = remove_prefix_indexes(remove_generic_indexes(candidates, type_name));
    let costed: Vec<(u64, IndexSearchDescriptor)> = candidates
        .into_iter()
        .map(|desc| (desc.cost(ctx), desc))
        .collect();
    let cheapest = costed.iter().map(|(cost, _)| *cost).min()?;
    let best = costed
        .into_iter()
        .filter(|(cost, _)| *cost == cheapest)
        .map(|(_, desc)| desc)
        .max_by_key(IndexSearchDescriptor::field_count)?;
    trace!(descriptor = %best, cost = cheapest, "index.best_for_block");
    Some(best)
}

/// Merges descriptors sharing index, key conditions and additional range,
/// OR-ing their remaining filters. First-seen order is kept.
pub fn common_factor(descriptors: Vec<IndexSearchDescriptor>) -> Vec<IndexSearchDescriptor> {
    let mut groups: Vec<(IndexSearchDescriptor, Vec<Condition>)> = Vec::new();
    for desc in descriptors {
        let existing = groups.iter_mut().find(|(head, _)| {
            head.index().name() == desc.index().name()
                && head.key_conditions() == desc.key_conditions()
                && head.additional_range() == desc.additional_range()
        });
        match existing {
            Some((_, remaining)) => remaining.push(desc.remaining().clone()),
            None => {
                let remaining = vec![desc.remaining().clone()];
                groups.push((desc, remaining));
            }
        }
    }
    groups
        .into_iter()
        .map(|(head, remaining)| head.with_remaining(Condition::or_all(remaining)))
        .collect()
}

/// Descriptors answering every block of a flattened predicate on `type_name`,
/// or `None` as soon as one block has no usable index.
pub fn select_indexes(
    ctx: &ExecutionContext,
    type_name: &str,
    blocks: &[Vec<Condition>],
) -> Option<Vec<IndexSearchDescriptor>> {
    let started = ctx.profile_timer();
    let indexes = ctx.database().schema().class_indexes(type_name);
    let mut found = Vec::with_capacity(blocks.len());
    let mut complete = !indexes.is_empty() && !blocks.is_empty();
    if complete {
        for block in blocks {
            match find_best_index_for(ctx, &indexes, block, type_name) {
                Some(desc) => found.push(desc),
                None => {
                    complete = false;
                    break;
                }
            }
        }
    }
    ctx.record_profile_timer(QueryProfileKind::IndexSelection, started);
    if !complete {
        debug!(type_name, blocks = blocks.len(), "index.no_full_cover");
        return None;
    }
    let merged = common_factor(found);
    debug!(type_name, descriptors = merged.len(), "index.selected");
    Some(merged)
}

/// Best ordered index able to stream `type_name` already sorted on
/// `order_fields`, for statements without a predicate.
pub fn sort_only_index(
    ctx: &ExecutionContext,
    type_name: &str,
    order_fields: &[&str],
) -> Option<IndexSearchDescriptor> {
    ctx.database()
        .schema()
        .class_indexes(type_name)
        .into_iter()
        .filter(|index| !index.definition().ignore_nulls)
        .map(IndexSearchDescriptor::flat)
        .find(|desc| desc.fully_sorted(order_fields))
}

/// True when some subtype of `type_name` is reachable along two paths.
pub fn is_diamond_hierarchy(schema: &dyn Schema, type_name: &str) -> bool {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([type_name.to_owned()]);
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current.clone()) {
            return true;
        }
        if let Some(info) = schema.get_type(&current) {
            queue.extend(info.subclasses.iter().cloned());
        }
    }
    false
}

/// Returns true for an equality-only key, which an index answers with point lookups.
pub fn is_equality_lookup(desc: &IndexSearchDescriptor) -> bool {
    desc.additional_range().is_none()
        && desc.key_conditions().iter().all(|cond| {
            matches!(
                cond,
                Condition::Compare {
                    op: CmpOp::Eq | CmpOp::Contains | CmpOp::ContainsKey | CmpOp::ContainsValue,
                    ..
                } | Condition::In { .. }
                    | Condition::ContainsText { .. }
            )
        })
}
