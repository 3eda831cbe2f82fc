use std::sync::mpsc;
use std::time::{Duration, Instant};

use super::{ActivitySignal, Wait};
use crate::api::cell::EventCell;
use crate::api::error::CellError;

#[test]
fn wait_elapses_without_signals() {
  let signal = ActivitySignal::new();
  let started = Instant::now();
  let outcome = signal.wait(Some(Instant::now() + Duration::from_millis(15)));
  assert_eq!(outcome, Ok(Wait::Elapsed));
  assert!(started.elapsed() >= Duration::from_millis(15));
}

#[test]
fn notify_wakes_a_waiting_activity() {
  let signal = ActivitySignal::new();
  let waker = signal.clone();
  let worker = std::thread::spawn(move || waker_wait(&waker));
  std::thread::sleep(Duration::from_millis(10));
  signal.notify();
  assert_eq!(worker.join().expect("worker"), Ok(Wait::Notified));
}

fn waker_wait(signal: &ActivitySignal) -> Result<Wait, CellError> {
  signal.wait(None)
}

#[test]
fn abort_wins_over_notify() {
  let signal = ActivitySignal::new();
  signal.notify();
  signal.abort();
  assert_eq!(signal.wait(None), Err(CellError::AbortActivity));
}

#[test]
fn abort_is_delivered_at_the_next_blocking_point() {
  let cell = EventCell::new("worker-cell", ());
  let (tx, rx) = mpsc::channel();

  let handle = cell
    .start_activity("sleeper", move |scope| {
      let outcome = scope.park();
      tx.send(outcome.clone()).expect("report outcome");
      outcome.map(|_| ())
    })
    .expect("start activity");

  std::thread::sleep(Duration::from_millis(10));
  handle.abort();
  assert_eq!(rx.recv_timeout(Duration::from_secs(1)).expect("outcome"), Err(CellError::AbortActivity));

  // The runner removes the activity and marks the handle finished.
  let deadline = Instant::now() + Duration::from_secs(1);
  while !handle.is_finished() {
    assert!(Instant::now() < deadline, "activity did not finish in time");
    std::thread::yield_now();
  }
  assert_eq!(cell.live_activities(), 0);
}

#[test]
fn checkpoint_reports_a_pending_abort() {
  let cell = EventCell::new("checkpoint-cell", ());
  let (tx, rx) = mpsc::channel();

  let handle = cell
    .start_activity("checker", move |scope| {
      // Wait until the abort flag is visible without blocking.
      while scope.checkpoint().is_ok() {
        std::thread::sleep(Duration::from_millis(1));
      }
      tx.send(scope.aborted()).expect("report");
      Err(CellError::AbortActivity)
    })
    .expect("start activity");

  handle.abort();
  assert!(rx.recv_timeout(Duration::from_secs(1)).expect("aborted flag"));
}

#[test]
fn activities_can_dispatch_back_into_the_cell() {
  let cell = EventCell::new("echo", 0u32);
  let (tx, rx) = mpsc::channel();

  cell
    .start_activity("writer", move |scope| {
      let Some(cell) = scope.cell() else {
        return Ok(());
      };
      let observed = cell.sync_call("bump", |turn| {
        *turn.state_mut() += 41;
        *turn.state()
      })?;
      tx.send(observed).expect("report");
      Ok(())
    })
    .expect("start activity");

  assert_eq!(rx.recv_timeout(Duration::from_secs(1)).expect("observed"), 41);
}
