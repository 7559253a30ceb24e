//! Execution context threaded through planning and every stream call.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::config::ExecutionConfig;
use crate::error::{QuarryError, Result};
use crate::query::profile::{QueryProfile, QueryProfileKind};
use crate::query::tuple::Tuple;
use crate::query::value::Value;
use crate::storage::{RecordStore, Schema, StatsStore};

/// Storage collaborators a plan runs against.
#[derive(Clone)]
pub struct Database {
    schema: Arc<dyn Schema>,
    records: Arc<dyn RecordStore>,
    stats: Arc<dyn StatsStore>,
}

impl Database {
    /// Bundles the collaborators.
    pub fn new(
        schema: Arc<dyn Schema>,
        records: Arc<dyn RecordStore>,
        stats: Arc<dyn StatsStore>,
    ) -> Self {
        Self {
            schema,
            records,
            stats,
        }
    }

    /// Schema lookups.
    pub fn schema(&self) -> &Arc<dyn Schema> {
        &self.schema
    }

    /// Record access.
    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Index statistics.
    pub fn stats(&self) -> &Arc<dyn StatsStore> {
        &self.stats
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// Cooperative cancellation flag shared between a caller and a running plan.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-execution state: collaborators, configuration, variables and the
/// cancellation flag.
///
/// Owned by the single thread evaluating a plan.
#[derive(Debug)]
pub struct ExecutionContext {
    database: Database,
    config: Arc<ExecutionConfig>,
    cancel: CancelToken,
    variables: FxHashMap<String, Value>,
    parameters: FxHashMap<String, Value>,
    prefetched: FxHashMap<String, Arc<Vec<Tuple>>>,
    matched: Option<Tuple>,
    profile: Option<Arc<QueryProfile>>,
}

impl ExecutionContext {
    /// Creates a context with the default configuration.
    pub fn new(database: Database) -> Self {
        Self::with_config(database, ExecutionConfig::default())
    }

    /// Creates a context with an explicit configuration.
    pub fn with_config(database: Database, config: ExecutionConfig) -> Self {
        let profile = config.profile_steps.then(Arc::default);
        Self {
            database,
            config: Arc::new(config),
            cancel: CancelToken::new(),
            variables: FxHashMap::default(),
            parameters: FxHashMap::default(),
            prefetched: FxHashMap::default(),
            matched: None,
            profile,
        }
    }

    /// Storage collaborators.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Active configuration.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Shared handle to the configuration.
    pub fn config_arc(&self) -> Arc<ExecutionConfig> {
        Arc::clone(&self.config)
    }

    /// Token that cancels this execution when set.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Replaces the cancellation token, for callers sharing one across contexts.
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    /// Fails with [`QuarryError::Cancelled`] once cancellation was requested.
    pub fn check_interrupted(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(QuarryError::Cancelled);
        }
        Ok(())
    }

    /// Reads a context variable.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Sets a context variable.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Reads a statement parameter.
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Binds a statement parameter.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.parameters.insert(name.into(), value.into());
    }

    /// Sorted parameter names, part of the plan cache key.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.parameters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Rows prefetched for a pattern alias.
    pub fn prefetched(&self, alias: &str) -> Option<Arc<Vec<Tuple>>> {
        self.prefetched.get(alias).cloned()
    }

    /// Stores rows prefetched for a pattern alias.
    pub fn set_prefetched(&mut self, alias: impl Into<String>, rows: Vec<Tuple>) {
        self.prefetched.insert(alias.into(), Arc::new(rows));
    }

    /// Partial pattern row visible to filters as `$matched`.
    pub fn matched(&self) -> Option<&Tuple> {
        self.matched.as_ref()
    }

    /// Replaces `$matched`, returning the previous row.
    pub fn set_matched(&mut self, row: Option<Tuple>) -> Option<Tuple> {
        std::mem::replace(&mut self.matched, row)
    }

    /// Planner counters, when profiling is on.
    pub fn profile(&self) -> Option<&QueryProfile> {
        self.profile.as_deref()
    }

    pub(crate) fn profile_timer(&self) -> Option<Instant> {
        self.profile.as_ref().map(|_| Instant::now())
    }

    pub(crate) fn record_profile_timer(&self, kind: QueryProfileKind, start: Option<Instant>) {
        if let (Some(profile), Some(start)) = (&self.profile, start) {
            profile.record(kind, start);
        }
    }
}
