use std::time::Duration;

use super::CallKind;
use crate::api::cell::EventCell;
use crate::api::error::CellError;

#[test]
fn frames_expose_their_name_and_kind() {
  let cell = EventCell::new("frame-info", ());
  cell
    .sync_call("describe", |turn| {
      assert_eq!(turn.call_name(), "describe");
      assert_eq!(turn.kind(), CallKind::Sync);
      assert_eq!(turn.cell_name(), "frame-info");
      assert!(turn.kind().has_reply());
    })
    .expect("sync call");

  cell
    .async_call("fire", |turn| {
      assert_eq!(turn.kind(), CallKind::Async);
      assert!(!turn.kind().has_reply());
    })
    .expect("async call");
}

#[test]
fn state_borrows_are_scoped_per_access() {
  let cell = EventCell::new("borrows", vec![1u32]);
  cell
    .sync_call("mutate", |turn| {
      turn.state_mut().push(2);
      assert_eq!(turn.state().len(), 2);
      turn.state_mut().push(3);
    })
    .expect("sync call");
  assert_eq!(cell.read(|v| v.len()).expect("read"), 3);
}

#[test]
fn yield_reply_accepts_exactly_one_terminal() {
  let cell = EventCell::new("single-shot", ());
  let value = cell
    .yield_call("run", |_turn, reply| {
      assert!(!reply.is_used());
      assert_eq!(reply.send(1u32), Ok(()));
      assert!(reply.is_used());
      assert_eq!(reply.send(2u32), Err(CellError::MultipleResults));
      let clone = reply.clone();
      assert_eq!(clone.send(3u32), Err(CellError::MultipleResults));
    })
    .expect("yield call");
  assert_eq!(value, 1);
}

#[test]
fn dropping_every_reply_clone_unblocks_the_caller() {
  let cell = EventCell::new("dropped-reply", ());
  let outcome: Result<u32, CellError> = cell.yield_call("never", |_turn, _reply| {
    // The reply is dropped unused when the handler returns.
  });
  assert_eq!(outcome, Err(CellError::Shutdown));
}

#[test]
fn reply_outlives_the_frame_through_an_activity() {
  let cell = EventCell::new("deferred", ());
  let value = cell
    .yield_call("run", |turn, reply| {
      turn
        .start_activity("replier", move |scope| {
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
fn shutdown_from_inside_a_frame_lets_the_frame_finish() {
  let cell = EventCell::new("self-shutdown", 0u32);
  let observed = cell
    .sync_call("quit", |turn| {
      turn.shutdown();
      *turn.state_mut() += 1;
      *turn.state()
    })
    .expect("the running frame completes");
  assert_eq!(observed, 1);
  assert_eq!(cell.sync_call("after", |turn| *turn.state()), Err(CellError::Shutdown));
}
