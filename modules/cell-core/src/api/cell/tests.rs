use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use super::{EventCell, Options};
use crate::api::activity::Spawner;
use crate::api::error::CellError;

struct Store {
  x: u32,
}

#[test]
fn async_then_sync_observes_the_write() {
  let cell = EventCell::new("store", Store { x: 0 });
  cell.async_call("set", |turn| turn.state_mut().x = 10).expect("async call");
  assert_eq!(cell.sync_call("get", |turn| turn.state().x).expect("sync call"), 10);
}

#[test]
fn read_is_request_reply_sugar() {
  let cell = EventCell::new("store", Store { x: 3 });
  assert_eq!(cell.read(|state| state.x).expect("read"), 3);
}

#[test]
fn calls_after_explicit_shutdown_are_rejected() {
  let cell = EventCell::new("store", Store { x: 0 });
  cell.shutdown();
  assert_eq!(cell.read(|state| state.x), Err(CellError::Shutdown));
  let deferred: Result<u32, CellError> = cell.yield_call("y", |_turn, _reply| {});
  assert_eq!(deferred, Err(CellError::Shutdown));
}

#[test]
fn dropping_the_owner_shuts_the_cell_down() {
  let cell = EventCell::new("short", 0u32);
  let handle = cell.cell_ref();
  assert!(handle.is_alive());
  drop(cell);
  assert!(!handle.is_alive());
  assert_eq!(handle.sync_call("after", |turn| *turn.state()), Err(CellError::Shutdown));
}

#[test]
fn cell_refs_do_not_keep_the_cell_alive() {
  let cell = EventCell::new("weakly-held", 1u32);
  let first = cell.cell_ref();
  let second = first.clone();
  drop(cell);
  assert!(!first.is_alive());
  assert!(!second.is_alive());
}

#[test]
fn activities_started_after_shutdown_are_refused() {
  let cell = EventCell::new("late", ());
  cell.shutdown();
  let err = cell.start_activity("too-late", |_scope| Ok(())).expect_err("refused");
  assert!(err.is_shutdown());
}

#[test]
fn custom_spawners_receive_the_activities() {
  struct Recording {
    names: std::sync::Mutex<Vec<String>>,
  }

  impl Spawner for Recording {
    fn spawn(&self, name: &str, f: Box<dyn FnOnce() + Send + 'static>) {
      self.names.lock().expect("names lock").push(name.to_owned());
      // Run inline: the pool decides where activities execute.
      f();
    }
  }

  let pool = Arc::new(Recording { names: std::sync::Mutex::new(Vec::new()) });
  let cell = EventCell::with_options("pooled", (), Options::new().with_spawner(pool.clone()));
  let (tx, rx) = mpsc::channel();
  cell
    .start_activity("job", move |_scope| {
      tx.send(()).expect("report");
      Ok(())
    })
    .expect("start activity");

  rx.recv_timeout(Duration::from_secs(1)).expect("activity ran");
  assert_eq!(pool.names.lock().expect("names lock").as_slice(), ["pooled::job".to_owned()]);
}

#[test]
fn guard_time_can_be_disabled() {
  let cell = EventCell::with_options("no-guard", (), Options::new().with_guard_time(None));
  cell
    .sync_call("slow", |_| std::thread::sleep(Duration::from_millis(5)))
    .expect("sync call");
}
