//! Background activities: parallel workers owned by a cell.
//!
//! Activities run on their own OS threads (or on a user-supplied [`Spawner`])
//! and cooperate with the cell exclusively through dispatched calls. The
//! abort signal is deliverable only at the blocking points exposed by
//! [`ActivityScope`]; code between blocking points is never preempted.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::error;

use crate::api::cell::CellRef;
use crate::api::error::CellError;
use crate::internal::event_loop::LoopCore;

/// Outcome of a blocking point that was not aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
  /// The deadline passed.
  Elapsed,
  /// [`ActivityHandle::notify`] woke the activity early.
  Notified,
}

/// Shared abort/notify flag pair, woken through a condvar.
#[derive(Debug)]
pub(crate) struct ActivitySignal {
  state: Mutex<SignalState>,
  wake: Condvar,
}

#[derive(Debug)]
struct SignalState {
  aborted: bool,
  notified: bool,
}

impl ActivitySignal {
  pub(crate) fn new() -> Arc<Self> {
    Arc::new(Self {
      state: Mutex::new(SignalState { aborted: false, notified: false }),
      wake: Condvar::new(),
    })
  }

  pub(crate) fn abort(&self) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.aborted = true;
    drop(state);
    self.wake.notify_all();
  }

  pub(crate) fn notify(&self) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.notified = true;
    drop(state);
    self.wake.notify_all();
  }

  pub(crate) fn is_aborted(&self) -> bool {
    self.state.lock().unwrap_or_else(PoisonError::into_inner).aborted
  }

  /// Blocks until the deadline, a notify, or an abort. Abort wins over a
  /// pending notify.
  pub(crate) fn wait(&self, deadline: Option<Instant>) -> Result<Wait, CellError> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
      if state.aborted {
        return Err(CellError::AbortActivity);
      }
      if state.notified {
        state.notified = false;
        return Ok(Wait::Notified);
      }
      match deadline {
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            return Ok(Wait::Elapsed);
          }
          let (guard, _) = self
            .wake
            .wait_timeout(state, deadline - now)
            .unwrap_or_else(PoisonError::into_inner);
          state = guard;
        }
        None => {
          state = self.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
      }
    }
  }
}

/// Execution context handed to an activity handler.
///
/// Every blocking point returns `Err(CellError::AbortActivity)` once the
/// abort signal has been injected, so `?` unwinds the handler cleanly.
pub struct ActivityScope<S> {
  cell: Weak<LoopCore<S>>,
  signal: Arc<ActivitySignal>,
  name: Arc<str>,
  id: u64,
}

impl<S: Send + 'static> ActivityScope<S> {
  pub(crate) const fn new(cell: Weak<LoopCore<S>>, signal: Arc<ActivitySignal>, name: Arc<str>, id: u64) -> Self {
    Self { cell, signal, name, id }
  }

  /// Name the activity was started with.
  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Registry id of this activity.
  #[must_use]
  pub const fn id(&self) -> u64 {
    self.id
  }

  /// Non-owning handle to the owning cell, for dispatching calls back in.
  /// `None` once the cell is gone.
  #[must_use]
  pub fn cell(&self) -> Option<CellRef<S>> {
    self.cell.upgrade().map(|_| CellRef::from_weak(self.cell.clone()))
  }

  /// Sleeps for `duration`.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::AbortActivity`] when the abort signal arrives.
  pub fn sleep(&self, duration: Duration) -> Result<Wait, CellError> {
    self.signal.wait(Some(Instant::now() + duration))
  }

  /// Sleeps until `deadline`.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::AbortActivity`] when the abort signal arrives.
  pub fn sleep_until(&self, deadline: Instant) -> Result<Wait, CellError> {
    self.signal.wait(Some(deadline))
  }

  /// Blocks until notified or aborted.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::AbortActivity`] when the abort signal arrives.
  pub fn park(&self) -> Result<Wait, CellError> {
    self.signal.wait(None)
  }

  /// Non-blocking abort check, for use inside longer computations.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::AbortActivity`] when the abort signal has arrived.
  pub fn checkpoint(&self) -> Result<(), CellError> {
    if self.signal.is_aborted() {
      Err(CellError::AbortActivity)
    } else {
      Ok(())
    }
  }

  /// Whether the abort signal has been injected.
  #[must_use]
  pub fn aborted(&self) -> bool {
    self.signal.is_aborted()
  }
}

/// Handle to a started activity.
#[derive(Clone, Debug)]
pub struct ActivityHandle {
  id: u64,
  name: Arc<str>,
  signal: Arc<ActivitySignal>,
  done: Arc<AtomicBool>,
}

impl ActivityHandle {
  pub(crate) const fn new(id: u64, name: Arc<str>, signal: Arc<ActivitySignal>, done: Arc<AtomicBool>) -> Self {
    Self { id, name, signal, done }
  }

  /// Name the activity was started with.
  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Registry id of this activity.
  #[must_use]
  pub const fn id(&self) -> u64 {
    self.id
  }

  /// Injects the abort signal; delivered at the activity's next blocking
  /// point.
  pub fn abort(&self) {
    self.signal.abort();
  }

  /// Wakes the activity's current blocking point with [`Wait::Notified`].
  pub fn notify(&self) {
    self.signal.notify();
  }

  /// Whether the activity handler has returned.
  #[must_use]
  pub fn is_finished(&self) -> bool {
    self.done.load(Ordering::Acquire)
  }
}

/// Scheduling seam for background activities.
///
/// The default spawns one named OS thread per activity; supplying a pool
/// implementation routes activities onto existing workers instead.
pub trait Spawner: Send + Sync + 'static {
  /// Runs `f`, typically on another thread. `name` is a scheduling hint.
  fn spawn(&self, name: &str, f: Box<dyn FnOnce() + Send + 'static>);
}

/// Default spawner: one named, detached OS thread per activity.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl Spawner for ThreadSpawner {
  fn spawn(&self, name: &str, f: Box<dyn FnOnce() + Send + 'static>) {
    if let Err(err) = thread::Builder::new().name(name.to_owned()).spawn(f) {
      error!(thread = name, %err, "failed to spawn activity thread");
    }
  }
}
