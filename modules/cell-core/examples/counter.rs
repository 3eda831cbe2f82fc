//! Minimal serialized-counter example: fire-and-forget writes, a
//! request/reply read, and a deferred reply served by an activity.

use std::time::Duration;

use eventcell_core_rs::EventCell;
use tracing_subscriber::FmtSubscriber;

struct Counter {
  value: u64,
}

fn main() {
  let env_filter =
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  let _ = FmtSubscriber::builder().with_env_filter(env_filter).try_init();

  let cell = EventCell::new("counter", Counter { value: 0 });

  for _ in 0..5 {
    cell.async_call("inc", |turn| turn.state_mut().value += 1).expect("inc");
  }

  let value = cell.read(|c| c.value).expect("read");
  tracing::info!(value, "after five increments");

  let doubled = cell
    .yield_call("double-later", |turn, reply| {
      let current = turn.state().value;
      turn
        .start_activity("doubler", move |scope| {
          scope.sleep(Duration::from_millis(50))?;
          reply.send(current * 2)?;
          Ok(())
        })
        .expect("start doubler");
    })
    .expect("deferred double");
  tracing::info!(doubled, "deferred reply arrived");

  cell.shutdown();
}
