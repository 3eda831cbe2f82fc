//! Event loop engine: the per-cell serializer and dispatcher.
//!
//! There is no dedicated loop thread. The serialization lock is a take-out
//! lock over the boxed state: the dispatching thread removes the state from
//! the parking slot under a short mutex, runs the handler on its own stack,
//! and puts the state back on frame exit. A thread is *internal* exactly
//! while its thread-local marker carries this loop's id, which is set and
//! cleared together with the frame.

#[cfg(test)]
mod tests;

use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::api::activity::{ActivityHandle, ActivityScope, ActivitySignal, Spawner};
use crate::api::boundary::{Direction, LoopRef, Sanitize};
use crate::api::cell::Options;
use crate::api::error::CellError;
use crate::api::turn::{CallKind, Reply, Turn};
use crate::internal::registry::ActivityRegistry;
use crate::internal::reply::{CallbackSink, Mailbox};

/// Thread-local loop marker used for internal/external context detection.
pub(crate) mod marker {
  use std::cell::Cell;

  /// Marker value meaning "no loop": every loop id is non-zero.
  pub(crate) const NONE: u64 = 0;

  thread_local! {
    static CURRENT_LOOP: Cell<u64> = const { Cell::new(NONE) };
  }

  pub(crate) fn current() -> u64 {
    CURRENT_LOOP.with(Cell::get)
  }

  pub(crate) fn enter(id: u64) -> u64 {
    CURRENT_LOOP.with(|cell| cell.replace(id))
  }

  pub(crate) fn restore(prev: u64) {
    CURRENT_LOOP.with(|cell| cell.set(prev));
  }

  /// Restores the previous marker on drop, so unwinding callbacks cannot
  /// leave a thread marked with a stale loop id.
  pub(crate) struct Reset(u64);

  impl Drop for Reset {
    fn drop(&mut self) {
      restore(self.0);
    }
  }

  pub(crate) fn enter_guarded(id: u64) -> Reset {
    Reset(enter(id))
  }
}

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

/// Routing context of the in-flight call.
pub(crate) struct Frame {
  pub(crate) kind: CallKind,
  pub(crate) name: Arc<str>,
  pub(crate) reply: Option<Arc<dyn CallbackSink>>,
}

/// The taken-out state plus the frame, alive on the serving thread's stack
/// for exactly the duration of one dispatch.
pub(crate) struct LiveFrame<S> {
  pub(crate) state: Box<RefCell<S>>,
  pub(crate) frame: Frame,
}

struct Parked<S> {
  state: Option<Box<RefCell<S>>>,
  holder: Option<ThreadId>,
}

/// One per cell: the serialization lock, the frame slot, the activity
/// registry, and the shutdown flag.
pub(crate) struct LoopCore<S> {
  id: u64,
  name: Arc<str>,
  weak_self: Weak<LoopCore<S>>,
  park: Mutex<Parked<S>>,
  idle: Condvar,
  current: AtomicPtr<LiveFrame<S>>,
  shut: AtomicBool,
  registry: ActivityRegistry,
  guard_time: Option<Duration>,
  spawner: Arc<dyn Spawner>,
}

impl<S: Send + 'static> LoopCore<S> {
  pub(crate) fn new(name: &str, state: S, options: Options) -> Arc<Self> {
    let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);
    let (guard_time, spawner) = options.into_parts();
    Arc::new_cyclic(|weak| Self {
      id,
      name: Arc::from(name),
      weak_self: weak.clone(),
      park: Mutex::new(Parked { state: Some(Box::new(RefCell::new(state))), holder: None }),
      idle: Condvar::new(),
      current: AtomicPtr::new(ptr::null_mut()),
      shut: AtomicBool::new(false),
      registry: ActivityRegistry::new(),
      guard_time,
      spawner,
    })
  }

  pub(crate) const fn name(&self) -> &Arc<str> {
    &self.name
  }

  pub(crate) fn loop_ref(&self) -> LoopRef {
    LoopRef::new(self.id, self.name.clone())
  }

  pub(crate) fn weak_self(&self) -> Weak<LoopCore<S>> {
    self.weak_self.clone()
  }

  pub(crate) const fn registry(&self) -> &ActivityRegistry {
    &self.registry
  }

  pub(crate) fn is_shut_down(&self) -> bool {
    self.shut.load(Ordering::Acquire)
  }

  /// A thread is internal exactly when its marker carries this loop's id.
  pub(crate) fn is_internal(&self) -> bool {
    marker::current() == self.id
  }

  /// Whether the calling thread currently holds the serialization lock,
  /// regardless of marker masking. True on the frame's own thread even while
  /// it is pumping callbacks in external context.
  pub(crate) fn is_ctrl_thread(&self) -> bool {
    let park = self.park.lock().unwrap_or_else(PoisonError::into_inner);
    park.holder == Some(thread::current().id())
  }

  fn acquire(&self) -> Result<Box<RefCell<S>>, CellError> {
    let me = thread::current().id();
    let mut park = self.park.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
      if self.shut.load(Ordering::Acquire) {
        return Err(CellError::Shutdown);
      }
      if park.holder == Some(me) {
        return Err(CellError::invalid_access(format!(
          "re-entrant call into cell `{}` while its frame is still active on this thread",
          self.name
        )));
      }
      if let Some(state) = park.state.take() {
        park.holder = Some(me);
        return Ok(state);
      }
      park = self.idle.wait(park).unwrap_or_else(PoisonError::into_inner);
    }
  }

  /// Runs one dispatched frame on the calling thread.
  ///
  /// The handler is run under `catch_unwind` so that the state, the frame
  /// slot, and the marker are restored on every exit path; a handler panic
  /// then resumes into the caller after the loop is serviceable again.
  pub(crate) fn serve<R>(
    &self,
    kind: CallKind,
    name: &str,
    reply: Option<Arc<dyn CallbackSink>>,
    f: impl FnOnce(&Turn<'_, S>) -> R,
  ) -> Result<R, CellError> {
    let state = self.acquire()?;
    let live = LiveFrame { state, frame: Frame { kind, name: Arc::from(name), reply } };
    let prev_marker = marker::enter(self.id);
    let entered = Instant::now();
    self.current.store(&live as *const LiveFrame<S> as *mut LiveFrame<S>, Ordering::Release);
    trace!(cell = %self.name, call = name, kind = ?kind, "frame enter");
    let outcome = catch_unwind(AssertUnwindSafe(|| f(&Turn::new(self, &live))));
    self.current.store(ptr::null_mut(), Ordering::Release);
    marker::restore(prev_marker);
    self.release(live, entered);
    match outcome {
      Ok(value) => Ok(value),
      Err(payload) => resume_unwind(payload),
    }
  }

  /// Parks the state again and wakes waiting callers, emitting the
  /// guard-time diagnostic when the frame overstayed.
  fn release(&self, live: LiveFrame<S>, entered: Instant) {
    let LiveFrame { state, frame } = live;
    let mut park = self.park.lock().unwrap_or_else(PoisonError::into_inner);
    park.state = Some(state);
    park.holder = None;
    drop(park);
    self.idle.notify_all();
    trace!(cell = %self.name, call = %frame.name, "frame exit");
    if let Some(limit) = self.guard_time {
      let held = entered.elapsed();
      if held > limit {
        warn!(
          cell = %self.name,
          call = %frame.name,
          held_ms = held.as_millis() as u64,
          limit_ms = limit.as_millis() as u64,
          "handler held the serialization lock past guard_time"
        );
      }
    }
  }

  /// Executes directly against the frame already active on this thread.
  pub(crate) fn run_internal<R>(&self, f: impl FnOnce(&Turn<'_, S>) -> R) -> R {
    debug_assert_eq!(marker::current(), self.id);
    let live = self.current.load(Ordering::Acquire);
    assert!(!live.is_null(), "internal dispatch without an active frame");
    // SAFETY: `current` is non-null only between frame entry and exit in
    // `serve`, both of which happen on the one thread whose marker carries
    // this loop id. The marker check above proves the caller is that thread,
    // so the pointee is the `LiveFrame` further down our own stack, still
    // alive, and never dereferenced concurrently.
    let live = unsafe { &*live };
    f(&Turn::new(self, live))
  }

  /// Fire-and-forget dispatch: internal invocations execute directly, panics
  /// in external frames are logged and discarded (there is no caller to
  /// receive them).
  pub(crate) fn op_async(&self, kind: CallKind, name: &str, f: impl FnOnce(&Turn<'_, S>)) -> Result<(), CellError> {
    if self.is_internal() {
      self.run_internal(f);
      return Ok(());
    }
    match catch_unwind(AssertUnwindSafe(|| self.serve(kind, name, None, f))) {
      Ok(outcome) => outcome,
      Err(payload) => {
        error!(
          cell = %self.name,
          call = name,
          panic = %panic_message(payload.as_ref()),
          "handler panicked in a fire-and-forget frame; error discarded"
        );
        Ok(())
      }
    }
  }

  /// Request/reply dispatch. The handler runs on this thread; afterwards the
  /// reply loop drains any callback records queued during the frame and
  /// returns the terminal value.
  pub(crate) fn op_sync<R: Sanitize>(
    &self,
    kind: CallKind,
    name: &str,
    f: impl FnOnce(&Turn<'_, S>) -> R,
  ) -> Result<R, CellError> {
    if self.is_internal() {
      return Ok(self.run_internal(f));
    }
    let mailbox = Mailbox::new();
    let served = self.serve(kind, name, Some(mailbox.sink()), f)?;
    mailbox.post_terminal(served.across(Direction::Outward, &self.loop_ref()));
    mailbox.reply_loop()
  }

  /// Deferred-reply dispatch. The handler receives a [`Reply`]; the caller
  /// blocks in the reply loop until some context invokes it.
  pub(crate) fn op_yield<R: Sanitize>(
    &self,
    kind: CallKind,
    name: &str,
    f: impl FnOnce(&Turn<'_, S>, Reply<R>),
  ) -> Result<R, CellError> {
    if self.is_internal() {
      return Err(CellError::invalid_access(format!(
        "deferred-reply call `{}` invoked from internal context of cell `{}`",
        name, self.name
      )));
    }
    let mailbox = Mailbox::new();
    let reply = Reply::new(mailbox.downgrade(), self.loop_ref());
    self.serve(kind, name, Some(mailbox.sink()), move |turn| f(turn, reply))?;
    mailbox.reply_loop()
  }

  /// Re-enters the loop with the result of an externally executed callback.
  ///
  /// When the executing thread is the frame's own thread (inline pump), the
  /// continuation runs directly inside the still-active frame; otherwise it
  /// is dispatched as an ordinary fire-and-forget call.
  pub(crate) fn external_callback_return(&self, done: Box<dyn FnOnce(&Turn<'_, S>) + Send>) {
    if self.is_ctrl_thread() {
      let _internal = marker::enter_guarded(self.id);
      self.run_internal(|turn| done(turn));
      return;
    }
    if let Err(err) = self.op_async(CallKind::CallbackReturn, "external_callback_return", |turn| done(turn)) {
      debug!(cell = %self.name, %err, "callback result dropped");
    }
  }

  /// Spawns a background activity and tracks it in the live set.
  pub(crate) fn start_activity<F>(&self, name: &str, f: F) -> Result<ActivityHandle, CellError>
  where
    F: FnOnce(ActivityScope<S>) -> Result<(), CellError> + Send + 'static, {
    if self.shut.load(Ordering::Acquire) {
      return Err(CellError::Shutdown);
    }
    let signal = ActivitySignal::new();
    let id = self.registry.insert(name, signal.clone());
    // A shutdown that raced ahead of the insert read a snapshot without this
    // entry, so the newcomer aborts itself here.
    if self.shut.load(Ordering::Acquire) {
      signal.abort();
    }
    let done = Arc::new(AtomicBool::new(false));
    let activity_name: Arc<str> = Arc::from(name);
    let scope = ActivityScope::new(self.weak_self.clone(), signal.clone(), activity_name.clone(), id);
    let handle = ActivityHandle::new(id, activity_name.clone(), signal, done.clone());
    let weak = self.weak_self.clone();
    let cell_name = self.name.clone();
    self.spawner.spawn(
      &format!("{}::{}", self.name, name),
      Box::new(move || {
        let outcome = catch_unwind(AssertUnwindSafe(|| f(scope)));
        match &outcome {
          Ok(Ok(())) => trace!(cell = %cell_name, activity = %activity_name, "activity finished"),
          Ok(Err(err)) if err.is_abort() => {
            debug!(cell = %cell_name, activity = %activity_name, "activity aborted")
          }
          Ok(Err(err)) => warn!(cell = %cell_name, activity = %activity_name, %err, "activity ended with an error"),
          Err(payload) => error!(
            cell = %cell_name,
            activity = %activity_name,
            panic = %panic_message(payload.as_ref()),
            "activity panicked"
          ),
        }
        done.store(true, Ordering::Release);
        if let Some(core) = weak.upgrade() {
          core.registry.remove(id);
        }
      }),
    );
    Ok(handle)
  }

  /// Monotonic shutdown: rejects further inbound calls and aborts every
  /// activity through the lock-free snapshot. Never waits on the
  /// serialization discipline; the parking mutex is tapped only so that a
  /// caller between its flag check and its wait cannot miss the wakeup.
  pub(crate) fn shutdown(&self) {
    if self.shut.swap(true, Ordering::AcqRel) {
      return;
    }
    debug!(cell = %self.name, "shutdown");
    self.registry.abort_all();
    drop(self.park.lock().unwrap_or_else(PoisonError::into_inner));
    self.idle.notify_all();
  }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_owned()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_owned()
  }
}
