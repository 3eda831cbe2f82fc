//! Callable wrappers: the three outbound call disciplines and the inbound
//! external callable.
//!
//! A wrapped proc carries only a weak back reference to its loop; the loop
//! holds no references to wrappers, and shutdown invalidates them (their
//! invocation then fails with [`CellError::Shutdown`]). Internal/external
//! behaviour is decided at invocation time by the thread-local loop marker:
//! on the ctrl thread the underlying closure runs directly inside the active
//! frame, on any other thread the invocation routes through dispatch.


use std::sync::{Arc, Weak};

use crate::api::boundary::{Direction, LoopRef, Sanitize};
use crate::api::error::CellError;
use crate::api::turn::{CallKind, Reply, Turn};
use crate::internal::event_loop::LoopCore;
use crate::internal::reply::{CallbackRecord, CallbackSink, CbSlot};

type AsyncBody<S, A> = Arc<dyn Fn(&Turn<'_, S>, A) + Send + Sync>;
type SyncBody<S, A, R> = Arc<dyn Fn(&Turn<'_, S>, A) -> R + Send + Sync>;
type YieldBody<S, A, R> = Arc<dyn Fn(&Turn<'_, S>, A, Reply<R>) + Send + Sync>;

/// Fire-and-forget proc created inside a loop.
pub struct AsyncProc<S, A> {
  core: Weak<LoopCore<S>>,
  origin: LoopRef,
  name: Arc<str>,
  body: AsyncBody<S, A>,
}

impl<S, A> Clone for AsyncProc<S, A> {
  fn clone(&self) -> Self {
    Self { core: self.core.clone(), origin: self.origin.clone(), name: self.name.clone(), body: self.body.clone() }
  }
}

impl<S: Send + 'static, A: Sanitize> AsyncProc<S, A> {
  pub(crate) fn new(
    core: Weak<LoopCore<S>>,
    origin: LoopRef,
    name: &str,
    body: impl Fn(&Turn<'_, S>, A) + Send + Sync + 'static,
  ) -> Self {
    Self { core, origin, name: Arc::from(name), body: Arc::new(body) }
  }

  /// Name the proc was declared with.
  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Invokes the proc: directly on the ctrl thread, via dispatch otherwise.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] when the owning cell is gone and
  /// [`CellError::InvalidBoundary`] when the argument cannot cross inward.
  pub fn call(&self, arg: A) -> Result<(), CellError> {
    let core = self.core.upgrade().ok_or(CellError::Shutdown)?;
    let arg = arg.across(Direction::Inward, &self.origin)?;
    let body = self.body.clone();
    core.op_async(CallKind::AsyncProc, &self.name, move |turn| body(turn, arg))
  }
}

impl<S: Send + 'static, A: Sanitize> Sanitize for AsyncProc<S, A> {}

/// Request/reply proc created inside a loop.
pub struct SyncProc<S, A, R> {
  core: Weak<LoopCore<S>>,
  origin: LoopRef,
  name: Arc<str>,
  body: SyncBody<S, A, R>,
}

impl<S, A, R> Clone for SyncProc<S, A, R> {
  fn clone(&self) -> Self {
    Self { core: self.core.clone(), origin: self.origin.clone(), name: self.name.clone(), body: self.body.clone() }
  }
}

impl<S: Send + 'static, A: Sanitize, R: Sanitize> SyncProc<S, A, R> {
  pub(crate) fn new(
    core: Weak<LoopCore<S>>,
    origin: LoopRef,
    name: &str,
    body: impl Fn(&Turn<'_, S>, A) -> R + Send + Sync + 'static,
  ) -> Self {
    Self { core, origin, name: Arc::from(name), body: Arc::new(body) }
  }

  /// Name the proc was declared with.
  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Invokes the proc and returns the handler's value. Blocks external
  /// callers until the frame completes; runs directly on the ctrl thread.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] when the owning cell is gone and
  /// [`CellError::InvalidBoundary`] when a value cannot cross the boundary.
  pub fn call(&self, arg: A) -> Result<R, CellError> {
    let core = self.core.upgrade().ok_or(CellError::Shutdown)?;
    let arg = arg.across(Direction::Inward, &self.origin)?;
    let body = self.body.clone();
    core.op_sync(CallKind::SyncProc, &self.name, move |turn| body(turn, arg))
  }
}

impl<S: Send + 'static, A: Sanitize, R: Sanitize> Sanitize for SyncProc<S, A, R> {}

/// Deferred-reply proc created inside a loop.
///
/// May never be invoked from internal context: its caller is the reply
/// waiter, and a frame cannot wait on itself.
pub struct YieldProc<S, A, R: Send + 'static> {
  core: Weak<LoopCore<S>>,
  origin: LoopRef,
  name: Arc<str>,
  body: YieldBody<S, A, R>,
}

impl<S, A, R: Send + 'static> Clone for YieldProc<S, A, R> {
  fn clone(&self) -> Self {
    Self { core: self.core.clone(), origin: self.origin.clone(), name: self.name.clone(), body: self.body.clone() }
  }
}

impl<S: Send + 'static, A: Sanitize, R: Sanitize> YieldProc<S, A, R> {
  pub(crate) fn new(
    core: Weak<LoopCore<S>>,
    origin: LoopRef,
    name: &str,
    body: impl Fn(&Turn<'_, S>, A, Reply<R>) + Send + Sync + 'static,
  ) -> Self {
    Self { core, origin, name: Arc::from(name), body: Arc::new(body) }
  }

  /// Name the proc was declared with.
  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Invokes the proc, blocking until the reply callable delivers a value.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::InvalidAccess`] when invoked from internal
  /// context, [`CellError::Shutdown`] when the owning cell is gone, and
  /// [`CellError::InvalidBoundary`] when a value cannot cross the boundary.
  pub fn call(&self, arg: A) -> Result<R, CellError> {
    let core = self.core.upgrade().ok_or(CellError::Shutdown)?;
    let arg = arg.across(Direction::Inward, &self.origin)?;
    let body = self.body.clone();
    core.op_yield(CallKind::YieldProc, &self.name, move |turn, reply| body(turn, arg, reply))
  }
}

impl<S: Send + 'static, A: Sanitize, R: Sanitize> Sanitize for YieldProc<S, A, R> {}

/// An external callable handed into a loop.
///
/// Inside the loop it is never executed synchronously: invocation queues a
/// callback record behind the frame's reply channel and the external side
/// runs the raw callable outside the engine's lock.
pub struct ExternalProc<A, R> {
  raw: Arc<dyn Fn(A) -> R + Send + Sync>,
  origin: LoopRef,
  name: Arc<str>,
}

impl<A, R> Clone for ExternalProc<A, R> {
  fn clone(&self) -> Self {
    Self { raw: self.raw.clone(), origin: self.origin.clone(), name: self.name.clone() }
  }
}

impl<A: Sanitize, R: Sanitize> ExternalProc<A, R> {
  pub(crate) fn new(origin: LoopRef, name: &str, raw: impl Fn(A) -> R + Send + Sync + 'static) -> Self {
    Self { raw: Arc::new(raw), origin, name: Arc::from(name) }
  }

  /// Name the callable was wrapped with.
  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Loop the callable is bound to.
  #[must_use]
  pub const fn owner(&self) -> &LoopRef {
    &self.origin
  }

  /// Direct invocation is rejected in every context.
  ///
  /// # Errors
  ///
  /// Always returns [`CellError::InvalidAccess`]: unwrap with
  /// [`ExternalProc::into_inner`] in external context, or route through
  /// [`ExternalProc::invoke`]/[`ExternalProc::invoke_then`] on the active
  /// turn in internal context.
  pub fn call(&self, _arg: A) -> Result<R, CellError> {
    Err(CellError::invalid_access(format!(
      "wrapped external callable `{}` cannot be invoked directly; unwrap it with into_inner() externally or \
       invoke it through the active turn internally",
      self.name
    )))
  }

  /// Unwraps the raw callable for plain external use.
  #[must_use]
  pub fn into_inner(self) -> Arc<dyn Fn(A) -> R + Send + Sync> {
    self.raw
  }

  /// Queues the callable behind the current frame's reply channel and hands
  /// back a single-shot handle for the result.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::InvalidAccess`] when the frame has no reply
  /// channel (fire-and-forget frames cannot route callback results) and
  /// [`CellError::InvalidBoundary`] when invoked under a foreign loop or the
  /// argument cannot cross outward.
  pub fn invoke<S: Send + 'static>(&self, turn: &Turn<'_, S>, arg: A) -> Result<CallbackResult<R>, CellError> {
    let sink = self.route(turn)?;
    let arg = arg.across(Direction::Outward, &self.origin)?;
    let slot = CbSlot::new();
    let raw = self.raw.clone();
    let fill = slot.clone();
    sink.push_callback(CallbackRecord::new(Box::new(move || fill.fill(raw(arg)))));
    Ok(CallbackResult { slot, sink, origin: self.origin.clone() })
  }

  /// Queues the callable and re-enters `done` with its result once the
  /// external side has run it, instead of blocking the handler.
  ///
  /// # Errors
  ///
  /// Same rules as [`ExternalProc::invoke`].
  pub fn invoke_then<S: Send + 'static>(
    &self,
    turn: &Turn<'_, S>,
    arg: A,
    done: impl FnOnce(&Turn<'_, S>, R) + Send + 'static,
  ) -> Result<(), CellError> {
    let sink = self.route(turn)?;
    let arg = arg.across(Direction::Outward, &self.origin)?;
    let raw = self.raw.clone();
    let weak = turn.core_weak();
    let origin = self.origin.clone();
    sink.push_callback(CallbackRecord::new(Box::new(move || {
      let value = raw(arg);
      let Some(core) = weak.upgrade() else {
        return;
      };
      core.external_callback_return(Box::new(move |turn| match value.across(Direction::Inward, &origin) {
        Ok(value) => done(turn, value),
        Err(err) => tracing::warn!(%err, "external callback result rejected at the boundary"),
      }));
    })));
    Ok(())
  }

  fn route<S: Send + 'static>(&self, turn: &Turn<'_, S>) -> Result<Arc<dyn CallbackSink>, CellError> {
    if turn.loop_ref() != self.origin {
      return Err(CellError::invalid_boundary(format!(
        "external callable `{}` is bound to cell `{}`, not `{}`",
        self.name,
        self.origin.name(),
        turn.cell_name()
      )));
    }
    turn.reply_sink().ok_or_else(|| {
      CellError::invalid_access(format!(
        "external callable `{}` invoked from frame `{}` which has no reply channel",
        self.name,
        turn.call_name()
      ))
    })
  }
}

impl<A: Sanitize, R: Sanitize> Sanitize for ExternalProc<A, R> {}

/// Single-shot handle for the result of one queued external callback.
pub struct CallbackResult<R> {
  slot: Arc<CbSlot<R>>,
  sink: Arc<dyn CallbackSink>,
  origin: LoopRef,
}

impl<R> std::fmt::Debug for CallbackResult<R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CallbackResult").field("origin", &self.origin).finish_non_exhaustive()
  }
}

impl<R: Sanitize> CallbackResult<R> {
  /// Blocks until the callback has produced its value.
  ///
  /// Read from inside the issuing frame this pumps the frame's own queued
  /// callbacks on the current thread, in external context and outside the
  /// engine's lock, so the read cannot deadlock against the caller.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::InvalidBoundary`] when the result cannot cross
  /// back inward.
  pub fn recv(self) -> Result<R, CellError> {
    loop {
      if let Some(value) = self.slot.take() {
        return value.across(Direction::Inward, &self.origin);
      }
      match self.sink.take_next_callback() {
        Some(record) => record.run(),
        None => self.slot.wait_filled(),
      }
    }
  }
}
