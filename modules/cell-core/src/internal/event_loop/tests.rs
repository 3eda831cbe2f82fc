use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::api::cell::EventCell;
use crate::api::error::CellError;

struct Exclusive {
  in_frame: bool,
  entries: u32,
}

#[test]
fn handlers_of_one_cell_never_overlap() {
  let cell = Arc::new(EventCell::new("exclusive", Exclusive { in_frame: false, entries: 0 }));

  thread::scope(|s| {
    for _ in 0..4 {
      let cell = cell.clone();
      s.spawn(move || {
        for _ in 0..50 {
          cell
            .sync_call("enter", |turn| {
              {
                let mut state = turn.state_mut();
                assert!(!state.in_frame, "two handlers active at once");
                state.in_frame = true;
                state.entries += 1;
              }
              thread::sleep(Duration::from_micros(50));
              turn.state_mut().in_frame = false;
            })
            .expect("sync call");
        }
      });
    }
  });

  assert_eq!(cell.read(|state| state.entries).expect("read"), 200);
}

#[test]
fn same_thread_calls_are_fifo() {
  let cell = EventCell::new("fifo", Vec::<u32>::new());
  for i in 0..10 {
    cell.async_call("push", move |turn| turn.state_mut().push(i)).expect("async call");
  }
  let seen = cell.read(Clone::clone).expect("read");
  assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[test]
fn internal_calls_execute_directly_inside_the_frame() {
  let cell = EventCell::new("nested", 0u32);
  cell
    .sync_call("outer", |turn| {
      let inner = turn.cell_ref();
      // Same thread, marker set: this runs against the active frame instead
      // of waiting on the lock we already hold.
      inner.async_call("inner", |turn| *turn.state_mut() += 1).expect("internal async");
      inner.sync_call("inner_sync", |turn| *turn.state()).expect("internal sync")
    })
    .map(|observed| assert_eq!(observed, 1))
    .expect("outer call");
}

#[test]
fn shutdown_rejects_further_calls() {
  let cell = EventCell::new("shut", 0u32);
  cell.shutdown();
  cell.shutdown(); // idempotent
  assert!(cell.is_shut_down());
  assert_eq!(cell.sync_call("after", |turn| *turn.state()), Err(CellError::Shutdown));
  assert_eq!(cell.async_call("after", |_| {}), Err(CellError::Shutdown));
}

#[test]
fn panicking_async_handler_is_discarded_and_loop_stays_serviceable() {
  let cell = EventCell::new("boom", 5u32);
  assert_eq!(cell.async_call("explode", |_| panic!("intentional")), Ok(()));
  assert_eq!(cell.read(|v| *v).expect("still serviceable"), 5);
}

#[test]
fn panicking_sync_handler_unwinds_into_the_caller() {
  let cell = EventCell::new("boom", 5u32);
  let result = catch_unwind(AssertUnwindSafe(|| cell.sync_call("explode", |_| -> u32 { panic!("intentional") })));
  assert!(result.is_err());
  // The state and the lock survived the unwind.
  assert_eq!(cell.read(|v| *v).expect("still serviceable"), 5);
}

#[test]
fn blocked_callers_are_woken_by_shutdown() {
  let cell = Arc::new(EventCell::new("wake", ()));
  let entered = Arc::new(AtomicU32::new(0));

  thread::scope(|s| {
    let holder = cell.clone();
    let seen = entered.clone();
    s.spawn(move || {
      holder
        .sync_call("hold", |_| {
          seen.store(1, Ordering::SeqCst);
          thread::sleep(Duration::from_millis(60));
        })
        .expect("holder call");
    });

    while entered.load(Ordering::SeqCst) == 0 {
      thread::yield_now();
    }
    let waiter = cell.clone();
    let blocked = s.spawn(move || waiter.sync_call("blocked", |_| ()));
    thread::sleep(Duration::from_millis(10));
    cell.shutdown();
    assert_eq!(blocked.join().expect("waiter thread"), Err(CellError::Shutdown));
  });
}
