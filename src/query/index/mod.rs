//! Index-backed access: condition matching, descriptors, selection and scans.

/// Condition-to-field matching rules.
pub mod aware;
/// Planned index lookups and their key ranges.
pub mod descriptor;
/// Index scan steps.
pub mod fetch;
/// Best-index selection.
pub mod selector;

pub use aware::{is_full_text_aware, is_index_aware, IndexSearchInfo};
pub use descriptor::{IndexSearchDescriptor, KeyRange};
pub use fetch::{FetchFromIndexStep, GetValueFromIndexEntryStep};
pub use selector::{
    common_factor, find_best_index_for, is_diamond_hierarchy, remove_generic_indexes,
    remove_prefix_indexes, select_indexes, sort_only_index,
};
