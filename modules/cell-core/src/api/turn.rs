//! The in-frame view handed to every handler.
//!
//! A [`Turn`] exists only for the duration of one dispatched frame (or a
//! direct internal invocation inside it). It grants scoped access to the
//! cell state, introspection of the running frame, and the constructors for
//! everything that must be born inside the loop: wrapped procs, opaque
//! handles, and background activities.

#[cfg(test)]
mod tests;

use std::cell::{Ref, RefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::api::activity::ActivityHandle;
use crate::api::boundary::{Direction, LoopRef, Opaque, Sanitize};
use crate::api::cell::CellRef;
use crate::api::error::CellError;
use crate::api::procs::{AsyncProc, SyncProc, YieldProc};
use crate::internal::event_loop::{LiveFrame, LoopCore};
use crate::internal::reply::{CallbackSink, MailboxInner};

/// Discipline of an in-flight call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
  /// Fire-and-forget cell call.
  Async,
  /// Request/reply cell call.
  Sync,
  /// Deferred-reply cell call.
  Yield,
  /// Fire-and-forget wrapped proc invocation.
  AsyncProc,
  /// Request/reply wrapped proc invocation.
  SyncProc,
  /// Deferred-reply wrapped proc invocation.
  YieldProc,
  /// Re-entry carrying an external callback result.
  CallbackReturn,
}

impl CallKind {
  /// Whether a frame of this kind carries a reply channel.
  #[must_use]
  pub const fn has_reply(self) -> bool {
    matches!(self, CallKind::Sync | CallKind::Yield | CallKind::SyncProc | CallKind::YieldProc)
  }
}

/// Scoped view of the cell during one frame.
pub struct Turn<'a, S> {
  core: &'a LoopCore<S>,
  live: &'a LiveFrame<S>,
}

impl<'a, S: Send + 'static> Turn<'a, S> {
  pub(crate) const fn new(core: &'a LoopCore<S>, live: &'a LiveFrame<S>) -> Self {
    Self { core, live }
  }

  /// Shared borrow of the cell state.
  ///
  /// # Panics
  ///
  /// Panics when the state is already mutably borrowed by this frame. Do not
  /// hold a state borrow across a nested proc invocation.
  #[must_use]
  pub fn state(&self) -> Ref<'_, S> {
    self.live.state.borrow()
  }

  /// Mutable borrow of the cell state.
  ///
  /// # Panics
  ///
  /// Panics when the state is already borrowed by this frame. Do not hold a
  /// state borrow across a nested proc invocation.
  #[must_use]
  pub fn state_mut(&self) -> RefMut<'_, S> {
    self.live.state.borrow_mut()
  }

  /// Name of the call being served.
  #[must_use]
  pub fn call_name(&self) -> &str {
    &self.live.frame.name
  }

  /// Discipline of the call being served.
  #[must_use]
  pub const fn kind(&self) -> CallKind {
    self.live.frame.kind
  }

  /// Name of the owning cell.
  #[must_use]
  pub fn cell_name(&self) -> &str {
    self.core.name()
  }

  /// Boundary identity of the owning loop.
  #[must_use]
  pub fn loop_ref(&self) -> LoopRef {
    self.core.loop_ref()
  }

  /// Non-owning handle to the cell, safe to move into activities.
  #[must_use]
  pub fn cell_ref(&self) -> CellRef<S> {
    CellRef::from_weak(self.core.weak_self())
  }

  pub(crate) fn core_weak(&self) -> Weak<LoopCore<S>> {
    self.core.weak_self()
  }

  pub(crate) fn reply_sink(&self) -> Option<Arc<dyn CallbackSink>> {
    self.live.frame.reply.clone()
  }

  /// Starts a background activity owned by this cell.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] when the cell is already shut down.
  pub fn start_activity<F>(&self, name: &str, f: F) -> Result<ActivityHandle, CellError>
  where
    F: FnOnce(crate::api::activity::ActivityScope<S>) -> Result<(), CellError> + Send + 'static, {
    self.core.start_activity(name, f)
  }

  /// Wraps an internal closure as a fire-and-forget proc that may escape
  /// outward.
  #[must_use]
  pub fn async_proc<A: Sanitize>(
    &self,
    name: &str,
    body: impl Fn(&Turn<'_, S>, A) + Send + Sync + 'static,
  ) -> AsyncProc<S, A> {
    AsyncProc::new(self.core.weak_self(), self.core.loop_ref(), name, body)
  }

  /// Wraps an internal closure as a request/reply proc that may escape
  /// outward.
  #[must_use]
  pub fn sync_proc<A: Sanitize, R: Sanitize>(
    &self,
    name: &str,
    body: impl Fn(&Turn<'_, S>, A) -> R + Send + Sync + 'static,
  ) -> SyncProc<S, A, R> {
    SyncProc::new(self.core.weak_self(), self.core.loop_ref(), name, body)
  }

  /// Wraps an internal closure as a deferred-reply proc that may escape
  /// outward.
  #[must_use]
  pub fn yield_proc<A: Sanitize, R: Sanitize>(
    &self,
    name: &str,
    body: impl Fn(&Turn<'_, S>, A, Reply<R>) + Send + Sync + 'static,
  ) -> YieldProc<S, A, R> {
    YieldProc::new(self.core.weak_self(), self.core.loop_ref(), name, body)
  }

  /// Moves an internal value into an opaque handle that can escape outward
  /// without exposing the raw value.
  #[must_use]
  pub fn opaque<T: Send + 'static>(&self, value: T) -> Opaque<T> {
    Opaque::new(value, self.core.loop_ref())
  }

  /// Shuts the owning cell down. The current frame completes normally.
  pub fn shutdown(&self) {
    self.core.shutdown();
  }
}

/// Reply callable of a deferred-reply frame.
///
/// Cloneable and sendable; whichever context ends up owning it delivers the
/// terminal value to the waiting caller. Only the first [`Reply::send`] is
/// accepted. If every clone is dropped unused, the waiting caller receives
/// [`CellError::Shutdown`] instead of hanging.
pub struct Reply<R: Send + 'static> {
  inner: Arc<ReplyInner<R>>,
}

struct ReplyInner<R: Send + 'static> {
  mailbox: Weak<MailboxInner<R>>,
  sent: AtomicBool,
  owner: LoopRef,
}

impl<R: Send + 'static> Clone for Reply<R> {
  fn clone(&self) -> Self {
    Self { inner: self.inner.clone() }
  }
}

impl<R: Sanitize> Reply<R> {
  pub(crate) fn new(mailbox: Weak<MailboxInner<R>>, owner: LoopRef) -> Self {
    Self {
      inner: Arc::new(ReplyInner { mailbox, sent: AtomicBool::new(false), owner }),
    }
  }

  /// Delivers the terminal value to the waiting caller.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::MultipleResults`] on the second and later sends,
  /// and [`CellError::InvalidBoundary`] when the value cannot cross outward.
  pub fn send(&self, value: R) -> Result<(), CellError> {
    let value = value.across(Direction::Outward, &self.inner.owner)?;
    if self.inner.sent.swap(true, Ordering::AcqRel) {
      return Err(CellError::MultipleResults);
    }
    if let Some(mailbox) = self.inner.mailbox.upgrade() {
      mailbox.push_terminal(Ok(value));
    }
    Ok(())
  }

  /// Whether a terminal value has already been delivered.
  #[must_use]
  pub fn is_used(&self) -> bool {
    self.inner.sent.load(Ordering::Acquire)
  }
}

impl<R: Send + 'static> Drop for ReplyInner<R> {
  fn drop(&mut self) {
    if !*self.sent.get_mut() {
      if let Some(mailbox) = self.mailbox.upgrade() {
        mailbox.push_terminal(Err(CellError::Shutdown));
      }
    }
  }
}

impl<R: Sanitize> Sanitize for Reply<R> {}
