
use core::fmt;

/// Errors surfaced by cell dispatch, wrapper invocation, and activity control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellError {
  /// An invocation was attempted from a context that cannot serve it, e.g. a
  /// yield proc invoked from internal context, a wrapped external callable
  /// invoked without unwrapping, or a re-entrant call while the caller's own
  /// frame is still active.
  InvalidAccess(String),
  /// A deferred-reply callable delivered more than one terminal value.
  MultipleResults,
  /// The abort signal was delivered to a background activity at one of its
  /// blocking points.
  AbortActivity,
  /// The cell has been shut down; no further inbound calls are accepted.
  Shutdown,
  /// A value could not be carried across the internal/external boundary with
  /// its semantics intact.
  InvalidBoundary(String),
}

impl CellError {
  pub(crate) fn invalid_access(reason: impl Into<String>) -> Self {
    CellError::InvalidAccess(reason.into())
  }

  pub(crate) fn invalid_boundary(reason: impl Into<String>) -> Self {
    CellError::InvalidBoundary(reason.into())
  }

  /// Returns `true` when the error indicates the owning cell is gone.
  #[must_use]
  pub const fn is_shutdown(&self) -> bool {
    matches!(self, CellError::Shutdown)
  }

  /// Returns `true` when the error is the cooperative abort signal.
  #[must_use]
  pub const fn is_abort(&self) -> bool {
    matches!(self, CellError::AbortActivity)
  }
}

impl fmt::Display for CellError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | CellError::InvalidAccess(reason) => write!(f, "invalid access: {}", reason),
      | CellError::MultipleResults => write!(f, "deferred reply delivered more than one terminal value"),
      | CellError::AbortActivity => write!(f, "activity aborted"),
      | CellError::Shutdown => write!(f, "cell has been shut down"),
      | CellError::InvalidBoundary(reason) => write!(f, "value cannot cross the cell boundary: {}", reason),
    }
  }
}

impl std::error::Error for CellError {}
