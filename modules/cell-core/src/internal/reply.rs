//! Reply channel: the per-call mailbox carrying callback records and the one
//! terminal value of a request/reply frame.


use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};

use crate::api::error::CellError;
use crate::internal::event_loop::marker;

/// A pre-bound execution of an external callable, queued behind the frame's
/// reply channel and executed outside the engine's lock.
pub(crate) struct CallbackRecord {
  exec: Box<dyn FnOnce() + Send>,
}

impl CallbackRecord {
  pub(crate) const fn new(exec: Box<dyn FnOnce() + Send>) -> Self {
    Self { exec }
  }

  /// Runs the callable. The thread-local loop marker is masked for the
  /// duration: callback bodies always observe external context, wherever the
  /// pump happens to run them.
  pub(crate) fn run(self) {
    let _external = marker::enter_guarded(marker::NONE);
    (self.exec)();
  }
}

/// Type-erased view of a reply channel that accepts callback records.
///
/// The frame stores this instead of the full mailbox so that the engine does
/// not need to know the terminal type of the call it is serving.
pub(crate) trait CallbackSink: Send + Sync {
  fn push_callback(&self, record: CallbackRecord);

  /// Removes the first queued callback record, leaving terminals in place.
  fn take_next_callback(&self) -> Option<CallbackRecord>;
}

enum Msg<R> {
  Terminal(Result<R, CellError>),
  Callback(CallbackRecord),
}

pub(crate) struct MailboxInner<R> {
  queue: Mutex<VecDeque<Msg<R>>>,
  ready: Condvar,
}

impl<R: Send + 'static> MailboxInner<R> {
  /// Delivers the terminal value and wakes the reply loop.
  pub(crate) fn push_terminal(&self, value: Result<R, CellError>) {
    let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
    queue.push_back(Msg::Terminal(value));
    drop(queue);
    self.ready.notify_all();
  }
}

impl<R: Send + 'static> CallbackSink for MailboxInner<R> {
  fn push_callback(&self, record: CallbackRecord) {
    let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
    queue.push_back(Msg::Callback(record));
    drop(queue);
    self.ready.notify_all();
  }

  fn take_next_callback(&self) -> Option<CallbackRecord> {
    let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
    let at = queue.iter().position(|msg| matches!(msg, Msg::Callback(_)))?;
    match queue.remove(at) {
      Some(Msg::Callback(record)) => Some(record),
      _ => None,
    }
  }
}

/// FIFO mailbox with blocking receive, allocated once per request/reply call.
pub(crate) struct Mailbox<R> {
  inner: Arc<MailboxInner<R>>,
}

impl<R: Send + 'static> Mailbox<R> {
  pub(crate) fn new() -> Self {
    Self {
      inner: Arc::new(MailboxInner { queue: Mutex::new(VecDeque::new()), ready: Condvar::new() }),
    }
  }

  pub(crate) fn sink(&self) -> Arc<dyn CallbackSink> {
    self.inner.clone()
  }

  pub(crate) fn downgrade(&self) -> Weak<MailboxInner<R>> {
    Arc::downgrade(&self.inner)
  }

  pub(crate) fn post_terminal(&self, value: Result<R, CellError>) {
    self.inner.push_terminal(value);
  }

  /// Drains the mailbox on the caller's thread: callback records execute
  /// outside the engine's lock, the first terminal ends the loop.
  pub(crate) fn reply_loop(&self) -> Result<R, CellError> {
    loop {
      let msg = {
        let mut queue = self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
          match queue.pop_front() {
            Some(msg) => break msg,
            None => queue = self.inner.ready.wait(queue).unwrap_or_else(PoisonError::into_inner),
          }
        }
      };
      match msg {
        Msg::Terminal(value) => return value,
        Msg::Callback(record) => record.run(),
      }
    }
  }
}

/// Single-shot slot a blocked internal reader waits on while the callback it
/// issued runs on the external side.
pub(crate) struct CbSlot<R> {
  value: Mutex<Option<R>>,
  filled: Condvar,
}

impl<R: Send + 'static> CbSlot<R> {
  pub(crate) fn new() -> Arc<Self> {
    Arc::new(Self { value: Mutex::new(None), filled: Condvar::new() })
  }

  pub(crate) fn fill(&self, value: R) {
    let mut slot = self.value.lock().unwrap_or_else(PoisonError::into_inner);
    *slot = Some(value);
    drop(slot);
    self.filled.notify_all();
  }

  pub(crate) fn take(&self) -> Option<R> {
    self.value.lock().unwrap_or_else(PoisonError::into_inner).take()
  }

  /// Blocks until a value is present, leaving it in the slot.
  pub(crate) fn wait_filled(&self) {
    let mut slot = self.value.lock().unwrap_or_else(PoisonError::into_inner);
    while slot.is_none() {
      slot = self.filled.wait(slot).unwrap_or_else(PoisonError::into_inner);
    }
  }
}
