//! Periodic-alarm example: a metronome cell that beats four times, then a
//! one-shot alarm cancels the repetition and reports the tally.

use std::time::Duration;

use eventcell_core_rs::EventCell;
use eventcell_timer_rs::{TimerCell, TimerState, TimerTurn, Timers};
use tracing_subscriber::FmtSubscriber;

struct Metronome {
  timers: Timers<Metronome>,
  beats: u32,
}

impl TimerState for Metronome {
  fn timers(&self) -> &Timers<Self> {
    &self.timers
  }

  fn timers_mut(&mut self) -> &mut Timers<Self> {
    &mut self.timers
  }
}

fn main() {
  let env_filter =
    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  let _ = FmtSubscriber::builder().with_env_filter(env_filter).try_init();

  let cell = EventCell::new("metronome", Metronome { timers: Timers::new(), beats: 0 });

  let beat = cell
    .timer_every(Duration::from_millis(100), |turn| {
      turn.state_mut().beats += 1;
      tracing::info!(beat = turn.state().beats, "tick");
    })
    .expect("start beating");

  let total = cell
    .yield_call("run", move |turn, reply| {
      TimerTurn::timer_after(turn, Duration::from_millis(450), move |turn| {
        TimerTurn::timer_cancel(turn, beat);
        let _ = reply.send(turn.state().beats);
      })
      .expect("schedule stop");
    })
    .expect("run");

  tracing::info!(total, "metronome stopped");
  cell.shutdown();
}
