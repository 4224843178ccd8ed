//! Error taxonomy for the task state machine.
//!
//! Misuse of the public API (mutating a running task, starting an already
//! running task, ...) is reported synchronously as [`TaskError`]. Failures
//! inside user-supplied actions never become a `TaskError` — they are routed
//! through the exception-climbing protocol in [`crate::task::executor`].

/// Errors the public API can return. User action panics are never converted
/// into one of these — see [`crate::task::executor`] for how those propagate.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The caller tried an operation the task's current state forbids, e.g.
    /// `start()` on a task that is already `STARTED`.
    #[error("invalid state for this operation: {0}")]
    InvalidState(&'static str),

    /// A value passed into the API violates a precondition (negative
    /// duration, unknown control value, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal invariant (see the crate's data model) was violated.
    /// Reaching this is a bug in this crate, not caller misuse.
    #[error("internal invariant violated: {0}")]
    Invariant(&'static str),
}

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, TaskError>;

/// Panics a thread with context identifying the violated invariant.
///
/// Internal invariant violations are fatal programming errors, not
/// recoverable `Result`s — they abort with a diagnostic instead.
pub(crate) fn invariant_violation(what: &str) -> ! {
    panic!("taskforge: internal invariant violated: {what}");
}
