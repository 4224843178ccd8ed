//! The mutex-guarded shared state behind a task head and the state
//! machine's transition methods.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{TaskError, Result};
use crate::link::Link;
use crate::task::handle::Task as TaskHandle;
use crate::task::state::{Activity, State};
use crate::wait::Interrupt;

/// What kind of repeat loop the head of a chain runs. Sleep/Once/Repeated/
/// Periodic only differ in how the head decides whether/when to re-run, so
/// they fold into one field rather than four task types.
#[derive(Clone)]
pub enum RepeatPolicy {
    /// Runs every link in the chain exactly once.
    Once,
    /// Re-invokes the *current* link's action based on its `Control` return,
    /// capped at `max` invocations if set.
    Repeated { max: Option<u32> },
    /// Re-invokes at a fixed interval regardless of the action's own delay
    /// preference, still honoring `Control::Stop` and `max`.
    Periodic { max: Option<u32>, interval: Duration },
    /// The action is empty; the chain is purely a sequence of delays.
    Sleep,
}

/// Where a resumed executor should pick up when `residual == 0`: re-run the
/// action only if the stop happened before it completed, otherwise just
/// advance past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ResumePoint {
    #[default]
    BeforeAction,
    AfterAction,
}

/// Everything that can change while a task runs, behind one private mutex:
/// state, activity, residual delay, cursor, wait handle, and children.
pub(crate) struct Shared {
    pub state: State,
    pub activity: Activity,
    /// Remaining delay from an interrupted wait; `Duration::ZERO` means none.
    pub residual: Duration,
    /// Index of the link currently executing / to resume at.
    pub cursor: usize,
    /// Invocation count for the current repeat loop; reset on restart.
    pub call_count: u32,
    pub chain: Vec<Link>,
    pub children: Vec<TaskHandle>,
    /// Set once this task's chain has been spliced onto another task via
    /// `append` — all head-only operations then fail.
    pub consumed: bool,
    /// Present only while `activity == Sleep`.
    pub wait_handle: Option<Interrupt>,
    pub resume_point: ResumePoint,
    /// The control value the action just returned, stashed across the
    /// between-action-and-delay suspension point.
    pub pending_control: Option<crate::action::Control>,
}

impl Shared {
    fn new(chain: Vec<Link>) -> Self {
        Shared {
            state: State::Created,
            activity: Activity::None,
            residual: Duration::ZERO,
            cursor: 0,
            call_count: 0,
            chain,
            children: Vec::new(),
            consumed: false,
            wait_handle: None,
            resume_point: ResumePoint::BeforeAction,
            pending_control: None,
        }
    }

    pub(crate) fn assert_legal(&self) {
        if !self.state.legal_with(self.activity) {
            crate::error::invariant_violation("illegal (state, activity) pair observed");
        }
    }
}

/// The task head's shared, reference-counted core.
pub struct TaskInner {
    pub(crate) id: u64,
    pub(crate) repeat_policy: RepeatPolicy,
    pub(crate) shared: Mutex<Shared>,
    pub(crate) cvar: Condvar,
    pub(crate) parent: Mutex<Option<Weak<TaskInner>>>,
    pub(crate) thread: Mutex<Option<JoinHandle<()>>>,
    pub(crate) threadless: Mutex<bool>,
}

impl TaskInner {
    pub(crate) fn new(repeat_policy: RepeatPolicy, chain: Vec<Link>) -> Arc<Self> {
        Arc::new(TaskInner {
            id: crate::id::next_task_id(),
            repeat_policy,
            shared: Mutex::new(Shared::new(chain)),
            cvar: Condvar::new(),
            parent: Mutex::new(None),
            thread: Mutex::new(None),
            threadless: Mutex::new(false),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reads `(state, activity)` as one atomic, consistent snapshot.
    pub(crate) fn snapshot(&self) -> (State, Activity) {
        let guard = self.lock();
        (guard.state, guard.activity)
    }

    fn set_state(&self, guard: &mut Shared, state: State) {
        guard.state = state;
        guard.assert_legal();
        self.cvar.notify_all();
    }

    /// `start()`'s state transition. Returns `Ok(true)` if this is a restart
    /// from `Stopped`/`Finished` (residual must be cleared), `Ok(false)` for
    /// a fresh start from `Created`.
    pub(crate) fn transition_start(&self) -> Result<()> {
        let mut guard = self.lock();
        if guard.consumed {
            return Err(TaskError::InvalidState(
                "task was consumed by append() and has no head operations",
            ));
        }
        match guard.state {
            State::Created | State::Stopped | State::Finished => {
                guard.residual = Duration::ZERO;
                guard.cursor = 0;
                guard.call_count = 0;
                guard.wait_handle = None;
                guard.resume_point = ResumePoint::BeforeAction;
                guard.pending_control = None;
                self.set_state(&mut guard, State::Started);
                Ok(())
            }
            State::Started | State::ToStop | State::ToContinue => Err(TaskError::InvalidState(
                "start() is only valid from Created, Stopped, or Finished",
            )),
        }
    }

    /// `stop()`'s state transition. Returns whether the executor/children
    /// actually need to be signalled (false means the call was a no-op).
    pub(crate) fn transition_stop(&self) -> Result<bool> {
        let mut guard = self.lock();
        if guard.consumed {
            return Err(TaskError::InvalidState(
                "task was consumed by append() and has no head operations",
            ));
        }
        match guard.state {
            State::Started | State::ToContinue => {
                self.set_state(&mut guard, State::ToStop);
                let interrupt = guard.wait_handle.clone();
                drop(guard);
                // Interrupting a wait must not require the state lock; it's
                // safe to call after releasing it.
                if let Some(interrupt) = interrupt {
                    interrupt.interrupt();
                }
                Ok(true)
            }
            State::Stopped | State::ToStop | State::Finished => Ok(false),
            State::Created => Err(TaskError::InvalidState(
                "stop() is rejected from Created",
            )),
        }
    }

    /// `cont()`'s state transition: a `cont()` arriving during `ToStop` joins
    /// the in-flight stop until it lands on `Stopped`, then proceeds.
    pub(crate) fn transition_cont(&self) -> Result<bool> {
        let mut guard = self.lock();
        if guard.consumed {
            return Err(TaskError::InvalidState(
                "task was consumed by append() and has no head operations",
            ));
        }
        loop {
            match guard.state {
                State::Stopped => {
                    self.set_state(&mut guard, State::ToContinue);
                    return Ok(true);
                }
                State::ToStop => {
                    guard = self
                        .cvar
                        .wait_while(guard, |s| s.state == State::ToStop)
                        .unwrap_or_else(|e| e.into_inner());
                }
                State::Finished => return Ok(false),
                State::Created | State::Started | State::ToContinue => {
                    return Err(TaskError::InvalidState(
                        "cont() is only valid from Stopped (or ToStop, which it waits out)",
                    ))
                }
            }
        }
    }

    /// `join()`: blocks until state is Stopped, Finished, or Created.
    pub(crate) fn join_wait(&self) {
        let guard = self.lock();
        let _ = self
            .cvar
            .wait_while(guard, |s| {
                !matches!(s.state, State::Stopped | State::Finished | State::Created)
            })
            .unwrap_or_else(|e| e.into_inner());
    }

    pub(crate) fn notify_state_change(&self) {
        self.cvar.notify_all();
    }

    /// Whether writes to args/duration/hooks are currently allowed: only in
    /// `Created`, `Stopped`, or `Finished`.
    pub(crate) fn check_writable(&self) -> Result<()> {
        let guard = self.lock();
        if guard.consumed {
            return Err(TaskError::InvalidState(
                "task was consumed by append() and has no head operations",
            ));
        }
        match guard.state {
            State::Created | State::Stopped | State::Finished => Ok(()),
            State::Started | State::ToStop | State::ToContinue => Err(TaskError::InvalidState(
                "configuration can only be changed in Created, Stopped, or Finished",
            )),
        }
    }
}
