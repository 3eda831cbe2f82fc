//! End-to-end scenarios exercising dispatch, deferred replies, callbacks,
//! and shutdown across real threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use eventcell_core_rs::{CellError, EventCell};

struct Store {
  x: u32,
}

#[test]
fn async_store_then_sync_read() {
  let cell = EventCell::new("store", Store { x: 0 });
  cell.async_call("set", |turn| turn.state_mut().x = 10).expect("set");
  assert_eq!(cell.read(|s| s.x).expect("read"), 10);
}

#[test]
fn deferred_reply_delivered_by_an_activity() {
  let cell = EventCell::new("deferred", ());
  let value = cell
    .yield_call("run", |turn, reply| {
      turn
        .start_activity("worker", move |scope| {
          scope.sleep(Duration::from_millis(10))?;
          reply.send(42u32)?;
          Ok(())
        })
        .expect("start activity");
    })
    .expect("yield call");
  assert_eq!(value, 42);
}

#[test]
fn concurrent_callers_serialize_without_loss() {
  let cell = Arc::new(EventCell::new("counter", 0u64));
  thread::scope(|s| {
    for _ in 0..8 {
      let cell = cell.clone();
      s.spawn(move || {
        for _ in 0..100 {
          cell.async_call("inc", |turn| *turn.state_mut() += 1).expect("inc");
        }
      });
    }
  });
  assert_eq!(cell.read(|v| *v).expect("read"), 800);
}

#[test]
fn effects_are_visible_to_the_next_call() {
  // Every handler observes the full effect of the previous one: the pair
  // (write, verify) from any thread never sees a torn intermediate.
  let cell = Arc::new(EventCell::new("pairs", (0u32, 0u32)));
  thread::scope(|s| {
    for _ in 0..4 {
      let cell = cell.clone();
      s.spawn(move || {
        for _ in 0..100 {
          cell
            .sync_call("write-pair", |turn| {
              let mut state = turn.state_mut();
              state.0 += 1;
              state.1 += 1;
            })
            .expect("write");
          cell
            .sync_call("verify", |turn| {
              let state = turn.state();
              assert_eq!(state.0, state.1, "torn pair observed");
            })
            .expect("verify");
        }
      });
    }
  });
}

#[test]
fn callbacks_flow_through_the_callers_reply_loop() {
  let cell = EventCell::new("cb", Vec::<u32>::new());
  let sink = cell.external_proc("sink", |n: u32| n + 1);

  let total = cell
    .sync_call("collect", move |turn| {
      let a = sink.invoke(turn, 1).expect("queue a").recv().expect("a");
      let b = sink.invoke(turn, a).expect("queue b").recv().expect("b");
      turn.state_mut().extend([a, b]);
      a + b
    })
    .expect("sync call");

  assert_eq!(total, 2 + 3);
  assert_eq!(cell.read(Clone::clone).expect("read"), vec![2, 3]);
}

#[test]
fn shutdown_drains_the_activity_set() {
  let started = Arc::new(AtomicBool::new(false));
  let flag = started.clone();
  let cell = EventCell::new("teardown", ());
  cell
    .async_call("init", move |turn| {
      turn
        .start_activity("sleeper", move |scope| {
          flag.store(true, Ordering::SeqCst);
          // Sleeps forever; only the abort signal ends it.
          scope.park().map(|_| ())
        })
        .expect("start activity");
    })
    .expect("init");

  while !started.load(Ordering::SeqCst) {
    thread::yield_now();
  }
  assert_eq!(cell.live_activities(), 1);

  cell.shutdown();
  let deadline = Instant::now() + Duration::from_secs(1);
  while cell.live_activities() != 0 {
    assert!(Instant::now() < deadline, "activity set did not drain");
    thread::sleep(Duration::from_millis(1));
  }
}

#[test]
fn yield_caller_is_released_when_shutdown_aborts_the_replier() {
  let cell = Arc::new(EventCell::new("cut-short", ()));

  let caller = {
    let cell = cell.clone();
    thread::spawn(move || {
      let outcome: Result<u32, CellError> = cell.yield_call("run", |turn, reply| {
        turn
          .start_activity("slow-replier", move |scope| {
            // Aborted long before the reply would be sent.
            scope.sleep(Duration::from_secs(30))?;
            reply.send(1)?;
            Ok(())
          })
          .expect("start activity");
      });
      outcome
    })
  };

  thread::sleep(Duration::from_millis(30));
  cell.shutdown();

  let outcome = caller.join().expect("caller thread");
  assert_eq!(outcome, Err(CellError::Shutdown));
}

#[test]
fn distinct_cells_do_not_share_a_lock() {
  let a = Arc::new(EventCell::new("a", 0u32));
  let b = Arc::new(EventCell::new("b", 0u32));
  let (tx, rx) = mpsc::channel();

  // Hold a's lock while calling into b: no interference.
  let holder = {
    let a = a.clone();
    let b = b.clone();
    thread::spawn(move || {
      a.sync_call("hold", |_| {
        b.sync_call("poke", |turn| *turn.state_mut() += 1).expect("poke b");
        thread::sleep(Duration::from_millis(20));
      })
      .expect("hold a");
      tx.send(()).expect("done");
    })
  };

  rx.recv_timeout(Duration::from_secs(1)).expect("holder finished");
  holder.join().expect("holder thread");
  assert_eq!(b.read(|v| *v).expect("read"), 1);
}
