//! LRU cache of execution plans keyed by statement text.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;
use xxhash_rust::xxh64::xxh64;

use crate::error::Result;
use crate::query::ast::Statement;
use crate::query::context::ExecutionContext;
use crate::query::plan::ExecutionPlan;
use crate::query::planner::create_plan;

/// Plans shared across executions of the same statement.
///
/// Only plans whose steps all report [`ExecutionPlan::can_be_cached`] are
/// stored; callers always receive a fresh copy.
pub struct PlanCache {
    plans: Option<Mutex<LruCache<u64, ExecutionPlan>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlanCache {
    /// Cache holding at most `capacity` plans; zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            plans: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache sized from `ctx`'s configuration.
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self::new(ctx.config().plan_cache_capacity)
    }

    fn key(statement: &Statement, ctx: &ExecutionContext) -> u64 {
        let mut text = format!("{statement:?}");
        for name in ctx.parameter_names() {
            text.push('\u{1f}');
            text.push_str(&name);
        }
        xxh64(text.as_bytes(), 0)
    }

    /// Returns a copy of the cached plan for `statement`, planning it on a miss.
    pub fn get_or_plan(&self, statement: &Statement, ctx: &ExecutionContext) -> Result<ExecutionPlan> {
        let Some(plans) = &self.plans else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return create_plan(statement, ctx);
        };
        let key = Self::key(statement, ctx);
        if let Some(plan) = plans.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key, "plan_cache.hit");
            return Ok(plan.copy());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let plan = create_plan(statement, ctx)?;
        if plan.can_be_cached() {
            plans.lock().put(key, plan.copy());
            trace!(key, "plan_cache.store");
        }
        Ok(plan)
    }

    /// Drops every cached plan, e.g. after a schema or index change.
    pub fn invalidate(&self) {
        if let Some(plans) = &self.plans {
            plans.lock().clear();
        }
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.plans.as_ref().map_or(0, |plans| plans.lock().len())
    }

    /// Returns true if no plan is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that had to plan.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache")
            .field("len", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::SelectStatement;
    use crate::query::expr::Condition;
    use crate::storage::MemoryDatabase;

    #[test]
    fn second_lookup_hits() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("V", &[])?;
        db.insert("V", [("x", 1)])?;
        let ctx = ExecutionContext::new(db.database());
        let cache = PlanCache::new(4);
        let statement: Statement = SelectStatement::from_type("V")
            .filter(Condition::eq("x", 1))
            .into();
        let first = cache.get_or_plan(&statement, &ctx)?;
        let second = cache.get_or_plan(&statement, &ctx)?;
        assert_eq!(first.plan_hash(), second.plan_hash());
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
        cache.invalidate();
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn zero_capacity_never_stores() -> Result<()> {
        let db = MemoryDatabase::new();
        db.create_type("V", &[])?;
        let ctx = ExecutionContext::new(db.database());
        let cache = PlanCache::new(0);
        let statement: Statement = SelectStatement::from_type("V").into();
        cache.get_or_plan(&statement, &ctx)?;
        cache.get_or_plan(&statement, &ctx)?;
        assert_eq!(cache.hits(), 0);
        assert!(cache.is_empty());
        Ok(())
    }
}
