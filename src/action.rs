//! The invocable action/hook type and the Repeated control-value protocol.
//!
//! Rust has no native positional/keyword-argument split, so bound arguments
//! are folded into the closure's captured environment rather than threaded
//! through as a separate `(args, kwargs)` pair. `ArgsBox` exists only so
//! callers can still swap the bound state of a link while it is idle —
//! args/kwargs are configuration, writable only while idle.

use std::any::Any;
use std::time::Duration;

/// Opaque bound arguments a link's action closes over.
///
/// Readers/writers on [`crate::link::Link`] and [`crate::task::Task`]
/// swap this box; the action itself decides how to interpret it by
/// downcasting.
pub type ArgsBox = Box<dyn Any + Send>;

/// A user action: an invocable run once per link activation.
///
/// Returns `Control` so the same closure type serves plain, Repeated, and
/// Periodic links uniformly; non-repeating links simply ignore the value.
pub type BoxedAction = Box<dyn FnMut() -> Control + Send>;

/// A lifecycle hook: start/stop/cont/final/exception.
///
/// Hooks never feed back into the executor's control flow, so they return
/// nothing — unlike actions, which can request delay/repeat/stop via
/// [`Control`].
pub type BoxedHook = Box<dyn FnMut() + Send>;

/// The exception handler invocable. Receives the panic payload
/// caught at the failing call site; returning means "handled, keep going",
/// while re-raising (resuming the unwind via [`std::panic::resume_unwind`])
/// means "propagate and unwind the executor thread".
pub type BoxedExcHandler = Box<dyn FnMut(Box<dyn Any + Send>) + Send>;

/// Tagged sum for what a Repeated/Periodic action's return communicates to
/// the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Control {
    /// Repeat immediately, no post-action delay. This is the action's
    /// default outcome — actions that don't care about Repeated semantics
    /// (plain `Once`/`Sleep` actions) simply fall through to it.
    #[default]
    Immediate,
    /// Repeat after the given delay.
    Delay(Duration),
    /// End the repeat loop now.
    Stop,
}

/// Builds a no-op action, used as the default for `Sleep` links whose whole
/// purpose is the post-action `duration`.
pub fn empty_action() -> BoxedAction {
    Box::new(|| Control::Immediate)
}
