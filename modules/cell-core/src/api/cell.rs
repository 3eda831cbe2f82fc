//! The event cell surface: the owning handle, the non-owning handle, and
//! construction options.

#[cfg(test)]
mod tests;

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::api::activity::{ActivityHandle, ActivityScope, Spawner, ThreadSpawner};
use crate::api::boundary::{LoopRef, Sanitize};
use crate::api::error::CellError;
use crate::api::procs::ExternalProc;
use crate::api::turn::{CallKind, Reply, Turn};
use crate::internal::event_loop::LoopCore;

/// Construction options for an event cell.
pub struct Options {
  guard_time: Option<Duration>,
  spawner: Arc<dyn Spawner>,
}

impl Options {
  /// Default options: 500 ms guard time, one fresh named thread per
  /// activity.
  #[must_use]
  pub fn new() -> Self {
    Self { guard_time: Some(Duration::from_millis(500)), spawner: Arc::new(ThreadSpawner) }
  }

  /// Emits a diagnostic when a single handler holds the serialization lock
  /// longer than this. `None` disables the check.
  #[must_use]
  pub fn with_guard_time(mut self, guard_time: Option<Duration>) -> Self {
    self.guard_time = guard_time;
    self
  }

  /// Schedules background activities on the given pool instead of fresh
  /// threads.
  #[must_use]
  pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
    self.spawner = spawner;
    self
  }

  pub(crate) fn into_parts(self) -> (Option<Duration>, Arc<dyn Spawner>) {
    (self.guard_time, self.spawner)
  }
}

impl Default for Options {
  fn default() -> Self {
    Self::new()
  }
}

/// Owning handle of a serialized event cell.
///
/// All access to the state `S` is marshalled into the cell's internal
/// context and processed one frame at a time. Dropping the handle shuts the
/// cell down.
pub struct EventCell<S: Send + 'static> {
  core: Arc<LoopCore<S>>,
}

impl<S: Send + 'static> EventCell<S> {
  /// Creates a cell with default [`Options`].
  #[must_use]
  pub fn new(name: &str, state: S) -> Self {
    Self::with_options(name, state, Options::new())
  }

  /// Creates a cell with explicit options.
  #[must_use]
  pub fn with_options(name: &str, state: S, options: Options) -> Self {
    Self { core: LoopCore::new(name, state, options) }
  }

  /// Name the cell was created with.
  #[must_use]
  pub fn name(&self) -> &str {
    self.core.name()
  }

  /// Boundary identity of the cell's loop.
  #[must_use]
  pub fn loop_ref(&self) -> LoopRef {
    self.core.loop_ref()
  }

  /// Non-owning handle, safe to hand to activities and other threads.
  #[must_use]
  pub fn cell_ref(&self) -> CellRef<S> {
    CellRef::from_weak(self.core.weak_self())
  }

  /// Fire-and-forget call: the handler runs serialized, no result flows
  /// back, handler panics are logged and discarded.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] after shutdown and
  /// [`CellError::InvalidAccess`] on a re-entrant call from a pumped
  /// callback.
  pub fn async_call(&self, name: &str, f: impl FnOnce(&Turn<'_, S>)) -> Result<(), CellError> {
    self.core.op_async(CallKind::Async, name, f)
  }

  /// Request/reply call: blocks until the handler's value is available.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] after shutdown,
  /// [`CellError::InvalidAccess`] on a re-entrant call, and
  /// [`CellError::InvalidBoundary`] when the result cannot cross outward.
  pub fn sync_call<R: Sanitize>(&self, name: &str, f: impl FnOnce(&Turn<'_, S>) -> R) -> Result<R, CellError> {
    self.core.op_sync(CallKind::Sync, name, f)
  }

  /// Deferred-reply call: the handler receives a [`Reply`] and the caller
  /// blocks until some context invokes it.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::InvalidAccess`] when invoked from internal
  /// context, plus the rules of [`EventCell::sync_call`].
  pub fn yield_call<R: Sanitize>(
    &self,
    name: &str,
    f: impl FnOnce(&Turn<'_, S>, Reply<R>),
  ) -> Result<R, CellError> {
    self.core.op_yield(CallKind::Yield, name, f)
  }

  /// Attribute accessor: reads a projection of the state through
  /// request/reply semantics.
  ///
  /// # Errors
  ///
  /// Same rules as [`EventCell::sync_call`].
  pub fn read<R: Sanitize>(&self, f: impl FnOnce(&S) -> R) -> Result<R, CellError> {
    self.sync_call("read", move |turn| f(&turn.state()))
  }

  /// Wraps an external callable for injection into this cell.
  #[must_use]
  pub fn external_proc<A: Sanitize, R: Sanitize>(
    &self,
    name: &str,
    f: impl Fn(A) -> R + Send + Sync + 'static,
  ) -> ExternalProc<A, R> {
    ExternalProc::new(self.core.loop_ref(), name, f)
  }

  /// Starts a background activity owned by this cell.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] when the cell is already shut down.
  pub fn start_activity<F>(&self, name: &str, f: F) -> Result<ActivityHandle, CellError>
  where
    F: FnOnce(ActivityScope<S>) -> Result<(), CellError> + Send + 'static, {
    self.core.start_activity(name, f)
  }

  /// Number of activities currently in the live set.
  #[must_use]
  pub fn live_activities(&self) -> usize {
    self.core.registry().live_count()
  }

  /// Whether the cell has been shut down.
  #[must_use]
  pub fn is_shut_down(&self) -> bool {
    self.core.is_shut_down()
  }

  /// Idempotent shutdown: rejects further inbound calls and aborts every
  /// live activity. Never blocks on the serialization lock.
  pub fn shutdown(&self) {
    self.core.shutdown();
  }
}

impl<S: Send + 'static> Drop for EventCell<S> {
  fn drop(&mut self) {
    self.core.shutdown();
  }
}

/// Non-owning handle to an event cell.
///
/// Holds only a weak reference: once the owning [`EventCell`] is gone every
/// operation fails with [`CellError::Shutdown`].
pub struct CellRef<S> {
  core: Weak<LoopCore<S>>,
}

impl<S> Clone for CellRef<S> {
  fn clone(&self) -> Self {
    Self { core: self.core.clone() }
  }
}

impl<S: Send + 'static> CellRef<S> {
  pub(crate) const fn from_weak(core: Weak<LoopCore<S>>) -> Self {
    Self { core }
  }

  fn upgrade(&self) -> Result<Arc<LoopCore<S>>, CellError> {
    self.core.upgrade().ok_or(CellError::Shutdown)
  }

  /// Whether the owning cell still exists and accepts calls.
  #[must_use]
  pub fn is_alive(&self) -> bool {
    self.core.upgrade().is_some_and(|core| !core.is_shut_down())
  }

  /// See [`EventCell::async_call`].
  ///
  /// # Errors
  ///
  /// Same rules as [`EventCell::async_call`].
  pub fn async_call(&self, name: &str, f: impl FnOnce(&Turn<'_, S>)) -> Result<(), CellError> {
    self.upgrade()?.op_async(CallKind::Async, name, f)
  }

  /// See [`EventCell::sync_call`].
  ///
  /// # Errors
  ///
  /// Same rules as [`EventCell::sync_call`].
  pub fn sync_call<R: Sanitize>(&self, name: &str, f: impl FnOnce(&Turn<'_, S>) -> R) -> Result<R, CellError> {
    self.upgrade()?.op_sync(CallKind::Sync, name, f)
  }

  /// See [`EventCell::yield_call`].
  ///
  /// # Errors
  ///
  /// Same rules as [`EventCell::yield_call`].
  pub fn yield_call<R: Sanitize>(
    &self,
    name: &str,
    f: impl FnOnce(&Turn<'_, S>, Reply<R>),
  ) -> Result<R, CellError> {
    self.upgrade()?.op_yield(CallKind::Yield, name, f)
  }

  /// See [`EventCell::read`].
  ///
  /// # Errors
  ///
  /// Same rules as [`EventCell::sync_call`].
  pub fn read<R: Sanitize>(&self, f: impl FnOnce(&S) -> R) -> Result<R, CellError> {
    self.sync_call("read", move |turn| f(&turn.state()))
  }

  /// See [`EventCell::external_proc`].
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] when the owning cell is gone.
  pub fn external_proc<A: Sanitize, R: Sanitize>(
    &self,
    name: &str,
    f: impl Fn(A) -> R + Send + Sync + 'static,
  ) -> Result<ExternalProc<A, R>, CellError> {
    Ok(ExternalProc::new(self.upgrade()?.loop_ref(), name, f))
  }

  /// See [`EventCell::start_activity`].
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] when the cell is gone or shut down.
  pub fn start_activity<F>(&self, name: &str, f: F) -> Result<ActivityHandle, CellError>
  where
    F: FnOnce(ActivityScope<S>) -> Result<(), CellError> + Send + 'static, {
    self.upgrade()?.start_activity(name, f)
  }

  /// See [`EventCell::shutdown`]. A no-op when the cell is already gone.
  pub fn shutdown(&self) {
    if let Ok(core) = self.upgrade() {
      core.shutdown();
    }
  }
}
