/// Background activity scopes, handles, and spawners.
pub mod activity;
/// Boundary classification of values crossing in and out of a cell.
pub mod boundary;
/// The event cell surface: owning and non-owning handles plus options.
pub mod cell;
/// Error taxonomy shared by dispatch, wrappers, and activities.
pub mod error;
/// Typed wrappers for the call disciplines and external callables.
pub mod procs;
/// The in-frame view handed to handlers.
pub mod turn;
