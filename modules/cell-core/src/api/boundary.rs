//! Argument sanitizer: classification of values crossing the internal/external
//! boundary of a cell.
//!
//! Most of the classification happens in the type system. Plain data passes
//! through unchanged, callables cross only as the typed wrappers of
//! [`crate::api::procs`], and raw mutable
//! internal values escape only as [`Opaque`] handles. What cannot be checked
//! statically (loop identity of a handle, direction-dependent rules) is
//! checked at the dispatch seams through [`Sanitize::across`].


use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use crate::api::error::CellError;
use crate::internal::event_loop::marker;

/// Cheap, type-erased identity of an event loop, used for boundary checks.
#[derive(Debug, Clone)]
pub struct LoopRef {
  id: u64,
  name: Arc<str>,
}

impl LoopRef {
  pub(crate) const fn new(id: u64, name: Arc<str>) -> Self {
    Self { id, name }
  }

  /// Name the cell was created with.
  #[must_use]
  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) const fn id(&self) -> u64 {
    self.id
  }
}

impl PartialEq for LoopRef {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Eq for LoopRef {}

/// Direction of a boundary crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  /// Crossing into the internal context of the loop.
  Inward,
  /// Crossing out of the internal context of the loop.
  Outward,
}

/// A value that may cross the internal/external boundary of a cell.
///
/// The default implementation passes the value through unchanged; wrapper
/// types override it where a runtime rule applies. Dispatch applies
/// [`Sanitize::across`] to call results, proc arguments and results, and
/// deferred replies.
pub trait Sanitize: Send + Sized + 'static {
  /// Carries `self` across the boundary of the given loop.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::InvalidBoundary`] when the value's semantics cannot
  /// be preserved on the far side.
  fn across(self, _direction: Direction, _lp: &LoopRef) -> Result<Self, CellError> {
    Ok(self)
  }
}

/// Marker for plain data: values with no callable or loop-bound semantics.
///
/// Plain values cross the boundary unchanged in both directions. User state
/// and message types opt in with an empty impl.
pub trait Plain: Send + 'static {}

impl<T: Plain> Sanitize for T {}

macro_rules! impl_plain {
  ($($ty:ty),* $(,)?) => {
    $(impl Plain for $ty {})*
  };
}

impl_plain!(
  (),
  bool,
  char,
  u8,
  u16,
  u32,
  u64,
  u128,
  usize,
  i8,
  i16,
  i32,
  i64,
  i128,
  isize,
  f32,
  f64,
  String,
  &'static str,
  Duration,
  Instant,
  SystemTime,
  CellError,
);

impl<T: Plain> Plain for Option<T> {}
impl<T: Plain> Plain for Vec<T> {}
impl<T: Plain> Plain for VecDeque<T> {}
impl<T: Plain> Plain for Box<T> {}
impl<T: Plain, E: Plain> Plain for Result<T, E> {}
impl<T: Plain + Sync> Plain for Arc<T> {}
impl<A: Plain, B: Plain> Plain for (A, B) {}
impl<A: Plain, B: Plain, C: Plain> Plain for (A, B, C) {}
impl<A: Plain, B: Plain, C: Plain, D: Plain> Plain for (A, B, C, D) {}
impl<K: Plain, V: Plain> Plain for HashMap<K, V> {}
impl<K: Plain, V: Plain> Plain for BTreeMap<K, V> {}

/// An internal value that escaped outward as an opaque handle.
///
/// The raw value never becomes visible outside its loop: external holders can
/// store and pass the handle around, but only code running inside the owning
/// loop can open it. Opening it under a different loop (or no loop) fails
/// with [`CellError::InvalidBoundary`].
#[derive(Debug)]
pub struct Opaque<T> {
  value: Arc<Mutex<Option<T>>>,
  owner: LoopRef,
}

impl<T> Clone for Opaque<T> {
  fn clone(&self) -> Self {
    Self { value: self.value.clone(), owner: self.owner.clone() }
  }
}

impl<T: Send + 'static> Opaque<T> {
  pub(crate) fn new(value: T, owner: LoopRef) -> Self {
    Self { value: Arc::new(Mutex::new(Some(value))), owner }
  }

  /// Loop the handle belongs to.
  #[must_use]
  pub const fn owner(&self) -> &LoopRef {
    &self.owner
  }

  fn check_context(&self) -> Result<(), CellError> {
    if marker::current() == self.owner.id() {
      Ok(())
    } else {
      Err(CellError::invalid_boundary(format!(
        "opaque handle of cell `{}` opened outside its loop",
        self.owner.name()
      )))
    }
  }

  /// Opens the handle for access to the raw value.
  ///
  /// # Errors
  ///
  /// Returns [`CellError::InvalidBoundary`] when invoked outside the owning
  /// loop or after the value was taken out.
  pub fn open<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, CellError> {
    self.check_context()?;
    let mut slot = self.value.lock().unwrap_or_else(PoisonError::into_inner);
    match slot.as_mut() {
      Some(value) => Ok(f(value)),
      None => Err(CellError::invalid_boundary(format!(
        "opaque handle of cell `{}` was already consumed",
        self.owner.name()
      ))),
    }
  }

  /// Moves the raw value back out of the handle.
  ///
  /// # Errors
  ///
  /// Same rules as [`Opaque::open`].
  pub fn take(&self) -> Result<T, CellError> {
    self.check_context()?;
    let mut slot = self.value.lock().unwrap_or_else(PoisonError::into_inner);
    slot.take().ok_or_else(|| {
      CellError::invalid_boundary(format!("opaque handle of cell `{}` was already consumed", self.owner.name()))
    })
  }
}

impl<T: Send + 'static> Sanitize for Opaque<T> {}
