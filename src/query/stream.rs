//! Pull-based tuple streams.
//!
//! A stream is a single-pass cursor. `has_next` may be called any number of
//! times before `next`; `next` is only valid after `has_next` returned true;
//! `close` releases everything the stream wraps and may be called repeatedly.
//! Streams also close themselves when dropped, so error paths that unwind
//! through `?` never leak an inner cursor.

use std::collections::VecDeque;

use crate::error::{QuarryError, Result};
use crate::query::context::ExecutionContext;
use crate::query::tuple::Tuple;

/// Lazily evaluated sequence of tuples.
pub trait ExecutionStream: Send {
    /// Returns true if another tuple is available. Idempotent.
    fn has_next(&mut self, ctx: &mut ExecutionContext) -> Result<bool>;

    /// Returns the next tuple; only valid after `has_next` returned true.
    fn next(&mut self, ctx: &mut ExecutionContext) -> Result<Tuple>;

    /// Releases this stream and every stream it wraps.
    fn close(&mut self);

    /// Combined `has_next` + `next`.
    fn try_next(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        if self.has_next(ctx)? {
            self.next(ctx).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Boxed stream handed between steps.
pub type BoxStream = Box<dyn ExecutionStream>;

fn exhausted() -> QuarryError {
    QuarryError::internal("next() called without a pending tuple")
}

/// Producer behind a [`SourceStream`]: yields one tuple per call.
pub trait TupleSource: Send {
    /// Produces the next tuple, or `None` once exhausted.
    fn produce(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>>;

    /// Closes wrapped streams first, then releases own resources.
    fn release(&mut self) {}
}

/// Adapts a [`TupleSource`] to the stream contract: one-tuple lookahead,
/// a cancellation check before every production, and close-once semantics.
pub struct SourceStream<S: TupleSource> {
    source: S,
    peeked: Option<Tuple>,
    exhausted: bool,
    closed: bool,
}

impl<S: TupleSource> SourceStream<S> {
    /// Wraps a source.
    pub fn new(source: S) -> Self {
        Self {
            source,
            peeked: None,
            exhausted: false,
            closed: false,
        }
    }
}

impl<S: TupleSource> ExecutionStream for SourceStream<S> {
    fn has_next(&mut self, ctx: &mut ExecutionContext) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        if self.exhausted || self.closed {
            return Ok(false);
        }
        ctx.check_interrupted()?;
        match self.source.produce(ctx)? {
            Some(tuple) => {
                self.peeked = Some(tuple);
                Ok(true)
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> Result<Tuple> {
        if !self.has_next(ctx)? {
            return Err(exhausted());
        }
        self.peeked.take().ok_or_else(exhausted)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.peeked = None;
        self.source.release();
    }
}

impl<S: TupleSource> Drop for SourceStream<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Boxes a source as a stream.
pub fn from_source<S: TupleSource + 'static>(source: S) -> BoxStream {
    Box::new(SourceStream::new(source))
}

/// Stream with no tuples.
#[derive(Debug, Default)]
pub struct EmptyStream;

impl ExecutionStream for EmptyStream {
    fn has_next(&mut self, _ctx: &mut ExecutionContext) -> Result<bool> {
        Ok(false)
    }

    fn next(&mut self, _ctx: &mut ExecutionContext) -> Result<Tuple> {
        Err(exhausted())
    }

    fn close(&mut self) {}
}

/// Empty boxed stream.
pub fn empty() -> BoxStream {
    Box::new(EmptyStream)
}

struct TupleBuffer(VecDeque<Tuple>);

impl TupleSource for TupleBuffer {
    fn produce(&mut self, _ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        Ok(self.0.pop_front())
    }

    fn release(&mut self) {
        self.0.clear();
    }
}

/// Stream over materialised tuples.
pub fn from_tuples(tuples: impl IntoIterator<Item = Tuple>) -> BoxStream {
    from_source(TupleBuffer(tuples.into_iter().collect()))
}

type FilterMapFn = Box<dyn FnMut(Tuple, &mut ExecutionContext) -> Result<Option<Tuple>> + Send>;

struct FilterMap {
    inner: BoxStream,
    f: FilterMapFn,
}

impl TupleSource for FilterMap {
    fn produce(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.inner.try_next(ctx)? {
            if let Some(mapped) = (self.f)(tuple, ctx)? {
                return Ok(Some(mapped));
            }
        }
        Ok(None)
    }

    fn release(&mut self) {
        self.inner.close();
    }
}

/// Maps each tuple, dropping those for which `f` returns `None`.
pub fn filter_map<F>(inner: BoxStream, f: F) -> BoxStream
where
    F: FnMut(Tuple, &mut ExecutionContext) -> Result<Option<Tuple>> + Send + 'static,
{
    from_source(FilterMap {
        inner,
        f: Box::new(f),
    })
}

type StreamFactory = Box<dyn FnMut(&mut ExecutionContext) -> Result<Option<BoxStream>> + Send>;

struct Chain {
    factory: StreamFactory,
    current: Option<BoxStream>,
}

impl TupleSource for Chain {
    fn produce(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(tuple) = current.try_next(ctx)? {
                    return Ok(Some(tuple));
                }
                current.close();
                self.current = None;
            }
            match (self.factory)(ctx)? {
                Some(next) => self.current = Some(next),
                None => return Ok(None),
            }
        }
    }

    fn release(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.close();
        }
    }
}

/// Concatenates streams produced on demand; each one is closed before the
/// next is requested.
pub fn chain<F>(factory: F) -> BoxStream
where
    F: FnMut(&mut ExecutionContext) -> Result<Option<BoxStream>> + Send + 'static,
{
    from_source(Chain {
        factory: Box::new(factory),
        current: None,
    })
}

struct OnClose<F: FnMut() + Send> {
    inner: BoxStream,
    hook: Option<F>,
}

impl<F: FnMut() + Send> TupleSource for OnClose<F> {
    fn produce(&mut self, ctx: &mut ExecutionContext) -> Result<Option<Tuple>> {
        self.inner.try_next(ctx)
    }

    fn release(&mut self) {
        self.inner.close();
        if let Some(mut hook) = self.hook.take() {
            hook();
        }
    }
}

/// Runs `hook` once, after `inner` has been closed.
pub fn on_close<F>(inner: BoxStream, hook: F) -> BoxStream
where
    F: FnMut() + Send + 'static,
{
    from_source(OnClose {
        inner,
        hook: Some(hook),
    })
}

/// Pulls every remaining tuple, then closes the stream.
pub fn drain(mut stream: BoxStream, ctx: &mut ExecutionContext) -> Result<()> {
    let result = loop {
        match stream.try_next(ctx) {
            Ok(Some(_)) => continue,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };
    stream.close();
    result
}

/// Collects every remaining tuple, then closes the stream.
pub fn collect(mut stream: BoxStream, ctx: &mut ExecutionContext) -> Result<Vec<Tuple>> {
    let mut out = Vec::new();
    let result = loop {
        match stream.try_next(ctx) {
            Ok(Some(tuple)) => out.push(tuple),
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };
    stream.close();
    result.map(|_| out)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::storage::MemoryDatabase;
    use crate::types::Rid;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(MemoryDatabase::new().database())
    }

    fn rids(n: i64) -> Vec<Tuple> {
        (0..n).map(|i| Tuple::bound(Rid::new(0, i))).collect()
    }

    #[test]
    fn has_next_is_idempotent() -> Result<()> {
        let mut ctx = ctx();
        let mut stream = from_tuples(rids(1));
        assert!(stream.has_next(&mut ctx)?);
        assert!(stream.has_next(&mut ctx)?);
        assert_eq!(stream.next(&mut ctx)?.rid(), Some(Rid::new(0, 0)));
        assert!(!stream.has_next(&mut ctx)?);
        assert!(stream.next(&mut ctx).is_err());
        stream.close();
        stream.close();
        Ok(())
    }

    #[test]
    fn close_runs_hooks_once_inner_first() -> Result<()> {
        let mut ctx = ctx();
        let closes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&closes);
        let inner = filter_map(from_tuples(rids(3)), |t, _| Ok(Some(t)));
        let mut stream = on_close(inner, move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(stream.has_next(&mut ctx)?);
        stream.close();
        stream.close();
        drop(stream);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn dropping_closes() {
        let closes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&closes);
        let stream = on_close(from_tuples(rids(2)), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        drop(stream);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chain_concatenates_and_cancellation_stops() -> Result<()> {
        let mut ctx = ctx();
        let mut parts = vec![rids(2), rids(1)].into_iter();
        let stream = chain(move |_| Ok(parts.next().map(from_tuples)));
        assert_eq!(collect(stream, &mut ctx)?.len(), 3);

        let stream = from_tuples(rids(2));
        ctx.cancel_token().cancel();
        assert_eq!(collect(stream, &mut ctx).unwrap_err(), QuarryError::Cancelled);
        Ok(())
    }
}
