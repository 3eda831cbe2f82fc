use std::time::{Duration, Instant};

use super::{AlarmEntry, AlarmKind, AlarmList};

fn once_entry(id: u64, deadline: Instant) -> AlarmEntry<()> {
  AlarmEntry { id, deadline, kind: AlarmKind::Once(Some(Box::new(|_| {}))) }
}

#[test]
fn soonest_sits_at_the_end() {
  let base = Instant::now();
  let mut list = AlarmList::new();
  list.insert(once_entry(1, base + Duration::from_millis(60)));
  list.insert(once_entry(2, base + Duration::from_millis(20)));
  list.insert(once_entry(3, base + Duration::from_millis(40)));

  assert_eq!(list.soonest(), Some(base + Duration::from_millis(20)));
  assert_eq!(list.pending(), 3);
}

#[test]
fn take_due_returns_ascending_deadlines() {
  let base = Instant::now();
  let mut list = AlarmList::new();
  list.insert(once_entry(1, base + Duration::from_millis(60)));
  list.insert(once_entry(2, base + Duration::from_millis(20)));
  list.insert(once_entry(3, base + Duration::from_millis(40)));

  let due = list.take_due(base + Duration::from_millis(45));
  assert_eq!(due.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 3]);
  assert_eq!(list.pending(), 1);
  assert_eq!(list.soonest(), Some(base + Duration::from_millis(60)));
}

#[test]
fn equal_deadlines_fire_in_insertion_order() {
  let base = Instant::now();
  let tick = base + Duration::from_millis(10);
  let mut list = AlarmList::new();
  list.insert(once_entry(1, tick));
  list.insert(once_entry(2, tick));
  list.insert(once_entry(3, tick));

  let due = list.take_due(tick);
  assert_eq!(due.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn remove_reports_whether_the_alarm_was_pending() {
  let base = Instant::now();
  let mut list = AlarmList::new();
  list.insert(once_entry(7, base + Duration::from_millis(5)));

  assert!(list.remove(7));
  assert!(!list.remove(7));
  assert_eq!(list.soonest(), None);
}

#[test]
fn take_due_with_nothing_due_is_empty() {
  let base = Instant::now();
  let mut list = AlarmList::new();
  list.insert(once_entry(1, base + Duration::from_secs(60)));
  assert!(list.take_due(base).is_empty());
  assert_eq!(list.pending(), 1);
}
