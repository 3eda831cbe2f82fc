//! eventcell core library
//!
//! A serialized event-cell concurrency primitive: an ordinary value becomes
//! an event-processing entity whose state is mutated only from a single
//! logical internal context. External callers, background activities, and
//! timers marshal their work into that context one frame at a time.
//!
//! # Key Features
//! - Three call disciplines: fire-and-forget, request/reply, deferred-reply
//! - Typed callable wrappers with internal/external invocation detection
//! - External callbacks routed through the caller's reply loop, never under
//!   the engine's lock
//! - Cooperative background activities with lock-free shutdown
#![deny(missing_docs)]
#![cfg_attr(
  test,
  allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::redundant_clone,
    clippy::missing_const_for_fn,
    clippy::disallowed_types
  )
)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::missing_safety_doc)]
#![deny(clippy::redundant_clone)]
#![deny(clippy::redundant_field_names)]
#![deny(clippy::redundant_pattern)]
#![deny(clippy::redundant_static_lifetimes)]
#![deny(clippy::unnecessary_to_owned)]
#![deny(clippy::unnecessary_struct_initialization)]
#![deny(clippy::needless_borrow)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::manual_ok_or)]
#![deny(clippy::manual_map)]
#![deny(clippy::manual_let_else)]
#![deny(clippy::manual_strip)]
#![deny(clippy::unused_async)]
#![deny(clippy::unused_self)]
#![deny(clippy::unnecessary_wraps)]
#![deny(clippy::unreachable)]
#![deny(clippy::empty_enum)]
#![deny(clippy::no_effect)]
#![deny(dropping_copy_types)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::print_stdout)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::missing_const_for_fn)]
#![deny(clippy::must_use_candidate)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::clone_on_copy)]
#![deny(clippy::len_without_is_empty)]
#![deny(clippy::wrong_self_convention)]
#![deny(clippy::from_over_into)]
#![deny(clippy::eq_op)]
#![deny(clippy::bool_comparison)]
#![deny(clippy::needless_bool)]
#![deny(clippy::match_like_matches_macro)]
#![deny(clippy::manual_assert)]
#![deny(clippy::naive_bytecount)]
#![deny(clippy::if_same_then_else)]
#![deny(clippy::cmp_null)]

mod internal;

/// Public API surface.
pub mod api;

pub use api::activity::{ActivityHandle, ActivityScope, Spawner, ThreadSpawner, Wait};
pub use api::boundary::{Direction, LoopRef, Opaque, Plain, Sanitize};
pub use api::cell::{CellRef, EventCell, Options};
pub use api::error::CellError;
pub use api::procs::{AsyncProc, CallbackResult, ExternalProc, SyncProc, YieldProc};
pub use api::turn::{CallKind, Reply, Turn};
