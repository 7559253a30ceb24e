use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::query::context::ExecutionContext;
use crate::query::stream::{BoxStream, ExecutionStream};
use crate::query::tuple::Tuple;

/// A snapshot of planner profiling metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryProfileSnapshot {
    /// Total nanoseconds spent building plans.
    pub plan_build_ns: u64,
    /// Number of plans built.
    pub plan_build_count: u64,
    /// Total nanoseconds spent choosing indexes.
    pub index_selection_ns: u64,
    /// Number of index selections.
    pub index_selection_count: u64,
    /// Total nanoseconds spent scheduling patterns.
    pub schedule_ns: u64,
    /// Number of pattern schedules computed.
    pub schedule_count: u64,
}

/// Planner counters owned by one [`ExecutionContext`].
///
/// Present only when `profile_steps` is on, which `QUARRY_PROFILE` also sets.
#[derive(Debug, Default)]
pub struct QueryProfile {
    plan_build_ns: AtomicU64,
    plan_build_count: AtomicU64,
    index_selection_ns: AtomicU64,
    index_selection_count: AtomicU64,
    schedule_ns: AtomicU64,
    schedule_count: AtomicU64,
}

pub(crate) enum QueryProfileKind {
    PlanBuild,
    IndexSelection,
    Schedule,
}

impl QueryProfile {
    pub(crate) fn record(&self, kind: QueryProfileKind, start: Instant) {
        let nanos = elapsed_nanos(start);
        let (ns, count) = match kind {
            QueryProfileKind::PlanBuild => (&self.plan_build_ns, &self.plan_build_count),
            QueryProfileKind::IndexSelection => {
                (&self.index_selection_ns, &self.index_selection_count)
            }
            QueryProfileKind::Schedule => (&self.schedule_ns, &self.schedule_count),
        };
        ns.fetch_add(nanos, Ordering::Relaxed);
        count.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads the counters. With `reset`, they are zeroed after reading.
    pub fn snapshot(&self, reset: bool) -> QueryProfileSnapshot {
        let load = |counter: &AtomicU64| {
            if reset {
                counter.swap(0, Ordering::Relaxed)
            } else {
                counter.load(Ordering::Relaxed)
            }
        };
        QueryProfileSnapshot {
            plan_build_ns: load(&self.plan_build_ns),
            plan_build_count: load(&self.plan_build_count),
            index_selection_ns: load(&self.index_selection_ns),
            index_selection_count: load(&self.index_selection_count),
            schedule_ns: load(&self.schedule_ns),
            schedule_count: load(&self.schedule_count),
        }
    }
}

fn elapsed_nanos(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Time and row counters for one plan step.
#[derive(Debug, Default)]
pub struct StepProfile {
    nanos: AtomicU64,
    rows: AtomicU64,
}

impl StepProfile {
    /// Nanoseconds spent inside the step's stream, upstream pulls included.
    pub fn nanos(&self) -> u64 {
        self.nanos.load(Ordering::Relaxed)
    }

    /// Tuples the step produced.
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    fn add(&self, start: Instant) {
        self.nanos.fetch_add(elapsed_nanos(start), Ordering::Relaxed);
    }
}

struct ProfiledStream {
    inner: BoxStream,
    profile: Arc<StepProfile>,
}

impl ExecutionStream for ProfiledStream {
    fn has_next(&mut self, ctx: &mut ExecutionContext) -> Result<bool> {
        let start = Instant::now();
        let result = self.inner.has_next(ctx);
        self.profile.add(start);
        result
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> Result<Tuple> {
        let start = Instant::now();
        let result = self.inner.next(ctx);
        self.profile.add(start);
        if result.is_ok() {
            self.profile.rows.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// Wraps `inner` so time spent in it is charged to `profile`.
pub(crate) fn profiled(inner: BoxStream, profile: Arc<StepProfile>) -> BoxStream {
    Box::new(ProfiledStream { inner, profile })
}
