use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::TimeoutStrategy;
use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::plan::ExplainProp;
use crate::query::steps::{require_input, ExecutionStep};
use crate::query::stream::{self, BoxStream, TupleSource};
use crate::query::tuple::Tuple;

struct Deadline {
    inner: Option<BoxStream>,
    deadline: Instant,
    limit: Duration,
    strategy: TimeoutStrategy,
}

impl TupleSource for Deadline {
    fn produce(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        if Instant::now() >= self.deadline {
            let limit_ms = u64::try_from(self.limit.as_millis()).unwrap_or(u64::MAX);
            debug!(limit_ms, strategy = ?self.strategy, "query.timeout");
            self.release();
            return match self.strategy {
                TimeoutStrategy::Fail => Err(QuarryError::Timeout { limit_ms }),
                TimeoutStrategy::Return => Ok(None),
            };
        }
        inner.try_next(ctx)
    }

    fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.close();
        }
    }
}

/// Bounds the wall-clock time spent producing the rest of the plan.
///
/// The clock starts when the step starts. Once it runs out the upstream is
/// closed and the stream either fails or ends, depending on the strategy.
#[derive(Clone, Debug)]
pub struct TimeoutStep {
    limit: Duration,
    strategy: TimeoutStrategy,
}

impl TimeoutStep {
    /// Limits execution to `limit`.
    pub fn new(limit: Duration, strategy: TimeoutStrategy) -> Self {
        Self { limit, strategy }
    }
}

impl ExecutionStep for TimeoutStep {
    fn name(&self) -> &'static str {
        "TIMEOUT"
    }

    fn start(&self, input: Option<BoxStream>, _ctx: &mut ExecutionContext) -> Result<BoxStream> {
        let upstream = require_input(input, self.name())?;
        Ok(stream::from_source(Deadline {
            inner: Some(upstream),
            deadline: Instant::now() + self.limit,
            limit: self.limit,
            strategy: self.strategy,
        }))
    }

    fn explain_props(&self) -> Vec<ExplainProp> {
        vec![
            ExplainProp::plain("limit_ms", self.limit.as_millis().to_string()),
            ExplainProp::plain("strategy", format!("{:?}", self.strategy)),
        ]
    }

    fn copy(&self) -> Box<dyn ExecutionStep> {
        Box::new(self.clone())
    }
}
