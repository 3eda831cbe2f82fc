//! The timer state mixin, the worker activity, and the extension traits.
//!
//! A cell opts in by embedding [`Timers`] in its state and implementing
//! [`TimerState`]. Handlers schedule through [`TimerTurn`]; external callers
//! go through [`TimerCell`], which routes every operation into the cell as a
//! request/reply call. The first scheduled alarm starts the single
//! `timer_worker` activity.


use std::sync::Arc;
use std::time::{Duration, Instant};

use eventcell_core_rs::{ActivityHandle, ActivityScope, CellError, CellRef, EventCell, Turn, Wait};
use tracing::trace;

use crate::alarm::{Alarm, AlarmEntry, AlarmKind, AlarmList};

/// Cell states that carry a timer service.
pub trait TimerState: Send + Sized + 'static {
  /// Shared access to the embedded timer mixin.
  fn timers(&self) -> &Timers<Self>;

  /// Mutable access to the embedded timer mixin.
  fn timers_mut(&mut self) -> &mut Timers<Self>;
}

/// Timer mixin embedded in a cell's state.
pub struct Timers<S> {
  list: AlarmList<S>,
  next_id: u64,
  worker: Option<ActivityHandle>,
  in_fire: bool,
  cancelled_mid_fire: Vec<u64>,
}

impl<S> Timers<S> {
  /// Creates an empty timer mixin. No worker is started until the first
  /// alarm is scheduled.
  #[must_use]
  pub const fn new() -> Self {
    Self {
      list: AlarmList::new(),
      next_id: 1,
      worker: None,
      in_fire: false,
      cancelled_mid_fire: Vec::new(),
    }
  }

  /// Number of alarms currently scheduled.
  #[must_use]
  pub fn pending(&self) -> usize {
    self.list.pending()
  }

  fn allocate_id(&mut self) -> u64 {
    let id = self.next_id;
    self.next_id += 1;
    id
  }

  fn take_cancelled(&mut self, id: u64) -> bool {
    match self.cancelled_mid_fire.iter().position(|&cancelled| cancelled == id) {
      Some(at) => {
        self.cancelled_mid_fire.swap_remove(at);
        true
      }
      None => false,
    }
  }
}

impl<S> Default for Timers<S> {
  fn default() -> Self {
    Self::new()
  }
}

/// Timer operations available inside handlers.
pub trait TimerTurn<S: TimerState> {
  /// Schedules a one-shot alarm `delay` from now.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] when the worker activity cannot be
  /// started because the cell is shutting down.
  fn timer_after<F>(&self, delay: Duration, f: F) -> Result<Alarm, CellError>
  where
    F: FnOnce(&Turn<'_, S>) + Send + 'static;

  /// Schedules a periodic alarm firing every `period`, first in `period`
  /// from now.
  ///
  /// # Errors
  ///
  /// Same rules as [`TimerTurn::timer_after`].
  fn timer_every<F>(&self, period: Duration, f: F) -> Result<Alarm, CellError>
  where
    F: Fn(&Turn<'_, S>) + Send + Sync + 'static;

  /// Cancels a scheduled alarm. Cancelling an unknown or already fired
  /// alarm is a no-op.
  fn timer_cancel(&self, alarm: Alarm);
}

impl<S: TimerState> TimerTurn<S> for Turn<'_, S> {
  fn timer_after<F>(&self, delay: Duration, f: F) -> Result<Alarm, CellError>
  where
    F: FnOnce(&Turn<'_, S>) + Send + 'static, {
    schedule(self, Instant::now() + delay, AlarmKind::Once(Some(Box::new(f))))
  }

  fn timer_every<F>(&self, period: Duration, f: F) -> Result<Alarm, CellError>
  where
    F: Fn(&Turn<'_, S>) + Send + Sync + 'static, {
    schedule(self, Instant::now() + period, AlarmKind::Every { period, callback: Arc::new(f) })
  }

  fn timer_cancel(&self, alarm: Alarm) {
    let notify = {
      let mut state = self.state_mut();
      let timers = state.timers_mut();
      let before = timers.list.soonest();
      let removed = timers.list.remove(alarm.id());
      if !removed && timers.in_fire {
        // Already sliced into the current fire pass; suppress it there.
        timers.cancelled_mid_fire.push(alarm.id());
      }
      // Reload iff the soonest deadline changed, and never when the worker
      // itself is the caller (it re-peeks when the fire pass returns).
      if removed && !timers.in_fire && timers.list.soonest() != before {
        timers.worker.clone()
      } else {
        None
      }
    };
    if let Some(worker) = notify {
      worker.notify();
    }
  }
}

/// Timer operations available to external callers, routed through
/// request/reply dispatch.
pub trait TimerCell<S: TimerState> {
  /// Schedules a one-shot alarm `delay` from now.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] once the cell is shut down.
  fn timer_after<F>(&self, delay: Duration, f: F) -> Result<Alarm, CellError>
  where
    F: FnOnce(&Turn<'_, S>) + Send + 'static;

  /// Schedules a periodic alarm firing every `period`.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] once the cell is shut down.
  fn timer_every<F>(&self, period: Duration, f: F) -> Result<Alarm, CellError>
  where
    F: Fn(&Turn<'_, S>) + Send + Sync + 'static;

  /// Cancels a scheduled alarm.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::Shutdown`] once the cell is shut down.
  fn timer_cancel(&self, alarm: Alarm) -> Result<(), CellError>;
}

impl<S: TimerState> TimerCell<S> for EventCell<S> {
  fn timer_after<F>(&self, delay: Duration, f: F) -> Result<Alarm, CellError>
  where
    F: FnOnce(&Turn<'_, S>) + Send + 'static, {
    self.sync_call("timer_after", move |turn| TimerTurn::timer_after(turn, delay, f))?
  }

  fn timer_every<F>(&self, period: Duration, f: F) -> Result<Alarm, CellError>
  where
    F: Fn(&Turn<'_, S>) + Send + Sync + 'static, {
    self.sync_call("timer_every", move |turn| TimerTurn::timer_every(turn, period, f))?
  }

  fn timer_cancel(&self, alarm: Alarm) -> Result<(), CellError> {
    self.sync_call("timer_cancel", move |turn| TimerTurn::timer_cancel(turn, alarm))
  }
}

impl<S: TimerState> TimerCell<S> for CellRef<S> {
  fn timer_after<F>(&self, delay: Duration, f: F) -> Result<Alarm, CellError>
  where
    F: FnOnce(&Turn<'_, S>) + Send + 'static, {
    self.sync_call("timer_after", move |turn| TimerTurn::timer_after(turn, delay, f))?
  }

  fn timer_every<F>(&self, period: Duration, f: F) -> Result<Alarm, CellError>
  where
    F: Fn(&Turn<'_, S>) + Send + Sync + 'static, {
    self.sync_call("timer_every", move |turn| TimerTurn::timer_every(turn, period, f))?
  }

  fn timer_cancel(&self, alarm: Alarm) -> Result<(), CellError> {
    self.sync_call("timer_cancel", move |turn| TimerTurn::timer_cancel(turn, alarm))
  }
}

fn schedule<S: TimerState>(turn: &Turn<'_, S>, deadline: Instant, kind: AlarmKind<S>) -> Result<Alarm, CellError> {
  ensure_worker(turn)?;
  let (alarm, notify) = {
    let mut state = turn.state_mut();
    let timers = state.timers_mut();
    let id = timers.allocate_id();
    let before = timers.list.soonest();
    timers.list.insert(AlarmEntry { id, deadline, kind });
    // Reload iff the soonest deadline changed; omitted inside a fire pass,
    // where the worker is the caller and re-peeks anyway.
    let notify = if !timers.in_fire && timers.list.soonest() != before {
      timers.worker.clone()
    } else {
      None
    };
    (Alarm::new(id), notify)
  };
  if let Some(worker) = notify {
    worker.notify();
  }
  Ok(alarm)
}

fn ensure_worker<S: TimerState>(turn: &Turn<'_, S>) -> Result<(), CellError> {
  if turn.state().timers().worker.is_some() {
    return Ok(());
  }
  let cell = turn.cell_ref();
  let handle = turn.start_activity("timer_worker", move |scope| worker_loop(&cell, &scope))?;
  turn.state_mut().timers_mut().worker = Some(handle);
  Ok(())
}

/// Sleeps until the soonest deadline and fires due alarms through ordinary
/// request/reply calls. A notify wake means the soonest deadline changed;
/// the loop restarts and re-peeks.
fn worker_loop<S: TimerState>(cell: &CellRef<S>, scope: &ActivityScope<S>) -> Result<(), CellError> {
  loop {
    let next = match cell.sync_call("timer_peek", |turn| turn.state().timers().list.soonest()) {
      Ok(next) => next,
      Err(CellError::Shutdown) => return Ok(()),
      Err(err) => return Err(err),
    };
    let wait = match next {
      Some(deadline) => scope.sleep_until(deadline)?,
      None => scope.park()?,
    };
    match wait {
      Wait::Notified => continue,
      Wait::Elapsed => match cell.sync_call("timer_fire", |turn| fire(turn)) {
        Ok(()) => {}
        Err(CellError::Shutdown) => return Ok(()),
        Err(err) => return Err(err),
      },
    }
  }
}

/// Slices off every due alarm and runs the callbacks in firing order.
/// Periodic alarms re-insert themselves at `now + period`.
fn fire<S: TimerState>(turn: &Turn<'_, S>) {
  let now = Instant::now();
  let due = {
    let mut state = turn.state_mut();
    let timers = state.timers_mut();
    timers.in_fire = true;
    timers.list.take_due(now)
  };
  trace!(cell = turn.cell_name(), due = due.len(), "timer fire");

  for mut entry in due {
    let skip = {
      let mut state = turn.state_mut();
      state.timers_mut().take_cancelled(entry.id)
    };
    if skip {
      continue;
    }
    match &mut entry.kind {
      AlarmKind::Once(callback) => {
        if let Some(callback) = callback.take() {
          callback(turn);
        }
      }
      AlarmKind::Every { period, callback } => {
        let period = *period;
        let callback = callback.clone();
        callback(turn);
        let mut state = turn.state_mut();
        state.timers_mut().list.insert(AlarmEntry {
          id: entry.id,
          deadline: now + period,
          kind: AlarmKind::Every { period, callback },
        });
      }
    }
  }

  let mut state = turn.state_mut();
  let timers = state.timers_mut();
  timers.in_fire = false;
  timers.cancelled_mid_fire.clear();
}
