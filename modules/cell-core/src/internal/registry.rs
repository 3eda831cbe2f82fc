//! Live-activity bookkeeping with a copy-on-write snapshot.
//!
//! The mutable set is guarded by its own mutex; every change replaces the
//! snapshot with a fresh immutable copy. Teardown reads only the snapshot
//! and never blocks on a lock, so it may run from `Drop`.


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::api::activity::ActivitySignal;

#[derive(Clone)]
pub(crate) struct ActivityEntry {
  pub(crate) id: u64,
  pub(crate) name: Arc<str>,
  pub(crate) signal: Arc<ActivitySignal>,
}

pub(crate) struct ActivityRegistry {
  live: Mutex<Vec<ActivityEntry>>,
  snapshot: ArcSwap<Vec<ActivityEntry>>,
  next_id: AtomicU64,
}

impl ActivityRegistry {
  pub(crate) fn new() -> Self {
    Self {
      live: Mutex::new(Vec::new()),
      snapshot: ArcSwap::from_pointee(Vec::new()),
      next_id: AtomicU64::new(1),
    }
  }

  /// Adds an entry and refreshes the snapshot. The entry is visible to
  /// teardown from this point on.
  pub(crate) fn insert(&self, name: &str, signal: Arc<ActivitySignal>) -> u64 {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
    live.push(ActivityEntry { id, name: Arc::from(name), signal });
    self.snapshot.store(Arc::new(live.clone()));
    id
  }

  pub(crate) fn remove(&self, id: u64) {
    let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
    live.retain(|entry| entry.id != id);
    self.snapshot.store(Arc::new(live.clone()));
  }

  /// Aborts everything in the snapshot without touching the live-set lock.
  pub(crate) fn abort_all(&self) {
    let snapshot = self.snapshot.load_full();
    for entry in snapshot.iter() {
      entry.signal.abort();
    }
  }

  pub(crate) fn live_count(&self) -> usize {
    self.snapshot.load().len()
  }

  #[cfg(test)]
  pub(crate) fn names(&self) -> Vec<Arc<str>> {
    self.snapshot.load().iter().map(|entry| entry.name.clone()).collect()
  }
}
