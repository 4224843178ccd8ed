//! The public task head type and its operations.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::action::{ArgsBox, BoxedAction, Control};
use crate::error::{Result, TaskError};
use crate::link::{Hooks, Link};
use crate::task::executor;
use crate::task::inner::{RepeatPolicy, TaskInner};
use crate::task::state::{Activity, State};

/// A task: the head of a chain of [`Link`]s, with a state machine, an
/// activity indicator, and a set of currently-running children.
///
/// Cheap to clone — every clone refers to the same underlying task, shared
/// via `Arc`.
#[derive(Clone)]
pub struct Task {
    pub(crate) inner: Arc<TaskInner>,
}

impl Task {
    fn new(repeat_policy: RepeatPolicy, chain: Vec<Link>) -> Result<Self> {
        if chain.is_empty() {
            return Err(TaskError::InvalidArgument(
                "a task needs at least one link".into(),
            ));
        }
        Ok(Task {
            inner: TaskInner::new(repeat_policy, chain),
        })
    }

    /// A chain that runs every link exactly once, in order.
    pub fn once(chain: Vec<Link>) -> Result<Self> {
        Self::new(RepeatPolicy::Once, chain)
    }

    /// A single-link task that re-invokes its action based on the
    /// `Control` it returns, optionally capped at `max` invocations.
    pub fn repeated(action: BoxedAction, max: Option<u32>) -> Result<Self> {
        Self::new(RepeatPolicy::Repeated { max }, vec![Link::new(action)])
    }

    /// A single-link task that re-invokes its action at a fixed `interval`,
    /// optionally capped at `max` invocations.
    pub fn periodic(action: BoxedAction, interval: Duration, max: Option<u32>) -> Result<Self> {
        if interval == Duration::ZERO {
            return Err(TaskError::InvalidArgument(
                "periodic interval must be positive".into(),
            ));
        }
        Self::new(
            RepeatPolicy::Periodic { max, interval },
            vec![Link::new(action)],
        )
    }

    /// A task whose whole purpose is a single interruptible delay.
    pub fn sleep(duration: Duration) -> Result<Self> {
        Self::new(RepeatPolicy::Sleep, vec![Link::sleeping(duration)])
    }

    /// Starts the task, running `delay` before the first link's action.
    /// Valid from `Created`, `Stopped`, or `Finished`; a restart clears any
    /// residual delay and resumes at the first link.
    ///
    /// `threadless = true` runs the executor inline on the calling thread —
    /// `start()` then does not return until the chain stops or finishes.
    /// Use this only for tasks launched as children from within another
    /// task's action; see [`Task::join`] for the foot-gun this creates.
    pub fn start(&self, delay: Duration, threadless: bool) -> Result<Self> {
        self.inner.transition_start()?;
        *self.inner.threadless.lock().unwrap_or_else(|e| e.into_inner()) = threadless;
        tracing::debug!(task = self.inner.id, threadless, "start()");

        if threadless {
            executor::run(Arc::clone(&self.inner), delay, false);
        } else {
            let inner = Arc::clone(&self.inner);
            let builder = thread::Builder::new().name(format!("taskforge-{}", self.inner.id));
            let join_handle = builder
                .spawn(move || executor::run(inner, delay, false))
                .expect("failed to spawn task executor thread");
            *self.inner.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(join_handle);
        }
        Ok(self.clone())
    }

    /// Requests a cooperative stop. Asynchronous: returns once the request
    /// is posted, not once the task has actually stopped (use `join()` for
    /// that). Idempotent from already-stopped/stopping/finished states;
    /// rejected from `Created`.
    pub fn stop(&self) -> Result<Self> {
        // Children stop first, then this task enters ToStop.
        let children: Vec<Task> = self.inner.lock().children.clone();
        for child in children {
            let _ = child.stop();
        }
        let needs_signal = self.inner.transition_stop()?;
        tracing::debug!(task = self.inner.id, needs_signal, "stop()");
        Ok(self.clone())
    }

    /// Resumes a stopped task. If called while still `ToStop`, blocks until
    /// the in-flight stop completes, then proceeds. A silent no-op from
    /// `Finished`.
    pub fn cont(&self) -> Result<Self> {
        let should_spawn = self.inner.transition_cont()?;
        tracing::debug!(task = self.inner.id, should_spawn, "cont()");
        if should_spawn {
            let threadless = *self.inner.threadless.lock().unwrap_or_else(|e| e.into_inner());
            if threadless {
                executor::run(Arc::clone(&self.inner), Duration::ZERO, true);
            } else {
                let inner = Arc::clone(&self.inner);
                let builder = thread::Builder::new().name(format!("taskforge-{}", self.inner.id));
                let join_handle = builder
                    .spawn(move || executor::run(inner, Duration::ZERO, true))
                    .expect("failed to spawn task executor thread");
                *self.inner.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(join_handle);
            }
        }
        Ok(self.clone())
    }

    /// Blocks until the task reaches `Stopped`, `Finished`, or `Created`.
    ///
    /// Rejected for a task that was started `threadless` — such a task has
    /// no execution context of its own to join (it ran inline on its
    /// launcher's thread), which is a known foot-gun; join the launching
    /// task instead.
    pub fn join(&self) -> Result<Self> {
        if *self.inner.threadless.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(TaskError::InvalidState(
                "a threadless task has no execution context of its own; join its launcher instead",
            ));
        }
        self.inner.join_wait();
        let handle = self.inner.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        Ok(self.clone())
    }

    /// Splices `other`'s chain onto the tail of `self`'s. `other` is
    /// consumed: afterwards its head-only operations fail with
    /// `InvalidState`. Both tasks must be idle (`Created`/`Stopped`/
    /// `Finished`).
    pub fn append(&self, other: &Task) -> Result<Self> {
        self.inner.check_writable()?;
        other.inner.check_writable()?;
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return Err(TaskError::InvalidArgument(
                "cannot append a task onto itself".into(),
            ));
        }

        // Lock in a fixed order (by id) to avoid deadlocking against a
        // concurrent append the other way around.
        if self.inner.id < other.inner.id {
            let mut self_guard = self.inner.lock();
            let mut other_guard = other.inner.lock();
            let moved = std::mem::take(&mut other_guard.chain);
            self_guard.chain.extend(moved);
            other_guard.consumed = true;
        } else {
            let mut other_guard = other.inner.lock();
            let mut self_guard = self.inner.lock();
            let moved = std::mem::take(&mut other_guard.chain);
            self_guard.chain.extend(moved);
            other_guard.consumed = true;
        }

        Ok(self.clone())
    }

    /// The task's current lifecycle state.
    pub fn state(&self) -> State {
        self.inner.snapshot().0
    }

    /// What the task's executor is presently doing.
    pub fn activity(&self) -> Activity {
        self.inner.snapshot().1
    }

    /// Replaces the head link's bound arguments. Only while idle.
    pub fn set_args(&self, args: ArgsBox) -> Result<()> {
        self.inner.check_writable()?;
        self.inner.lock().chain[0].args = Some(args);
        Ok(())
    }

    /// Replaces the head link's post-action duration. Only while idle.
    pub fn set_duration(&self, duration: Duration) -> Result<()> {
        self.inner.check_writable()?;
        self.inner.lock().chain[0].duration = Some(duration);
        Ok(())
    }

    /// Replaces the head link's hooks. Only while idle.
    pub fn set_hooks(&self, hooks: Hooks) -> Result<()> {
        self.inner.check_writable()?;
        self.inner.lock().chain[0].hooks = hooks;
        Ok(())
    }

    /// Registers `child` as running under `self`, for stop/cont propagation.
    /// Call this from within a task's action right after starting a child
    /// you want `self.stop()`/`self.cont()` to reach.
    pub fn adopt_child(&self, child: &Task) {
        child
            .inner
            .parent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(Arc::downgrade(&self.inner));
        self.inner.lock().children.push(child.clone());
    }

    /// Removes a finished or externally-managed child from the children
    /// set. Safe to call even if the child was never adopted.
    pub fn forget_child(&self, child: &Task) {
        self.inner
            .lock()
            .children
            .retain(|c| !Arc::ptr_eq(&c.inner, &child.inner));
    }
}

impl Control {
    /// Maps a user action's return value onto the `Control` protocol: any
    /// positive number of seconds → `Delay`, `0`/`false`/nothing →
    /// `Immediate`, `-1`/`true` → `Stop`.
    pub fn from_seconds(seconds: f64) -> Self {
        if seconds > 0.0 {
            Control::Delay(Duration::from_secs_f64(seconds))
        } else if seconds < 0.0 {
            Control::Stop
        } else {
            Control::Immediate
        }
    }

    pub fn from_bool(stop: bool) -> Self {
        if stop {
            Control::Stop
        } else {
            Control::Immediate
        }
    }
}
