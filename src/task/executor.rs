//! The chain-walking executor.
//!
//! One instance of this loop is attached to a task at a time — a task has
//! at most one execution context running at once. It runs either on a
//! freshly spawned thread or inline on the caller, depending on
//! `threadless`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::action::Control;
use crate::task::handle::Task;
use crate::task::inner::{RepeatPolicy, ResumePoint, TaskInner};
use crate::task::state::{Activity, State};

/// Runs the chain from the current cursor to completion, a stop, or an
/// unrecovered panic. Entered both for a fresh `start()` and for a `cont()`
/// resuming a previously stopped task.
pub(crate) fn run(inner: Arc<TaskInner>, initial_delay: Duration, resuming: bool) {
    tracing::debug!(task = inner.id, resuming, "executor entered");

    if resuming {
        {
            let mut guard = inner.lock();
            if guard.state == State::ToContinue {
                guard.state = State::Started;
                guard.assert_legal();
            }
        }
        inner.notify_state_change();

        resume_children(&inner);
        fire_head_hook(&inner, HeadHook::Cont);

        let residual = residual_to_wait(&inner);
        if residual > Duration::ZERO {
            // The post-action delay was interrupted; finish waiting it out,
            // then go straight to advancing past the link that already ran.
            if !wait_or_stop(&inner, residual) {
                return;
            }
            let cursor = inner.lock().cursor;
            advance_cursor(&inner, cursor, Control::Immediate);
        } else {
            let resume_point = inner.lock().resume_point;
            if resume_point == ResumePoint::AfterAction {
                if observe_stop(&inner) {
                    return;
                }
                let cursor = inner.lock().cursor;
                let control = inner
                    .lock()
                    .pending_control
                    .take()
                    .unwrap_or(Control::Immediate);
                if !apply_delay_and_advance(&inner, cursor, control) {
                    return;
                }
            }
            // ResumePoint::BeforeAction: the stop landed before the action
            // at `cursor` ever ran, so the main loop below will (re)run it.
        }
    } else {
        fire_head_hook(&inner, HeadHook::Start);
        if initial_delay > Duration::ZERO && !wait_or_stop(&inner, initial_delay) {
            return;
        }
    }

    main_loop(&inner);
}

fn main_loop(inner: &Arc<TaskInner>) {
    loop {
        // The link at the current cursor hasn't run yet this iteration, so a
        // stop observed below should resume by running it, not skipping it.
        inner.lock().resume_point = ResumePoint::BeforeAction;

        if observe_stop(inner) {
            return;
        }

        let (chain_len, cursor) = {
            let guard = inner.lock();
            (guard.chain.len(), guard.cursor)
        };
        if cursor >= chain_len {
            finish(inner);
            return;
        }

        let control = match run_action_at(inner, cursor) {
            Some(c) => c,
            None => return, // stopped, or the default handler re-raised
        };

        {
            let mut guard = inner.lock();
            guard.pending_control = Some(control);
            guard.resume_point = ResumePoint::AfterAction;
        }

        if observe_stop(inner) {
            return;
        }

        let control = inner.lock().pending_control.take().unwrap_or(control);
        if !apply_delay_and_advance(inner, cursor, control) {
            return;
        }
    }
}

/// Computes the post-action delay, waits it out (interruptibly), and
/// advances the cursor. Returns `false` if a stop cut the wait short (the
/// caller must return immediately) or the chain finished.
fn apply_delay_and_advance(inner: &Arc<TaskInner>, cursor: usize, control: Control) -> bool {
    match delay_after(inner, cursor, control) {
        None => {
            finish(inner);
            false
        }
        Some(delay) => {
            if delay > Duration::ZERO {
                inner.lock().residual = Duration::ZERO;
                if !wait_or_stop(inner, delay) {
                    return false;
                }
            }
            advance_cursor(inner, cursor, control);
            true
        }
    }
}

/// Runs one action, catching panics and routing them through exception
/// climbing. Returns `None` if the task stopped or the
/// executor's thread must unwind (the exception reached the default
/// handler and re-raised); returns `Some(control)` otherwise.
fn run_action_at(inner: &Arc<TaskInner>, cursor: usize) -> Option<Control> {
    {
        let mut guard = inner.lock();
        guard.activity = Activity::Busy;
    }
    inner.notify_state_change();

    // The action is taken out of the chain for the duration of the call so
    // the state mutex is never held while user code runs.
    let mut action = {
        let mut guard = inner.lock();
        std::mem::replace(&mut guard.chain[cursor].action, crate::action::empty_action())
    };

    let result = catch_unwind(AssertUnwindSafe(|| action()));

    {
        let mut guard = inner.lock();
        guard.chain[cursor].action = action;
        guard.activity = Activity::None;
    }

    match result {
        Ok(control) => {
            inner.lock().call_count += 1;
            Some(control)
        }
        Err(payload) => handle_panic(inner, cursor, payload),
    }
}

enum HeadHook {
    Start,
    Stop,
    Cont,
    Final,
}

/// Fires one of the head link's lifecycle hooks without holding the state
/// mutex while it runs, catching a panic and routing it through the same
/// exception-climbing search as an action panic.
fn fire_head_hook(inner: &Arc<TaskInner>, which: HeadHook) {
    let hook = {
        let mut guard = inner.lock();
        if guard.chain.is_empty() {
            return;
        }
        let hooks = &mut guard.chain[0].hooks;
        match which {
            HeadHook::Start => hooks.on_start.take(),
            HeadHook::Stop => hooks.on_stop.take(),
            HeadHook::Cont => hooks.on_cont.take(),
            HeadHook::Final => hooks.on_final.take(),
        }
    };
    let Some(mut hook) = hook else { return };

    let result = catch_unwind(AssertUnwindSafe(|| hook()));

    {
        let mut guard = inner.lock();
        if let Some(link) = guard.chain.get_mut(0) {
            let slot = match which {
                HeadHook::Start => &mut link.hooks.on_start,
                HeadHook::Stop => &mut link.hooks.on_stop,
                HeadHook::Cont => &mut link.hooks.on_cont,
                HeadHook::Final => &mut link.hooks.on_final,
            };
            *slot = Some(hook);
        }
    }

    if let Err(payload) = result {
        let _ = handle_panic(inner, 0, payload);
    }
}

/// Checks whether the head's state is `ToStop`, and if so performs the
/// stop-at-suspension-point protocol: fire `on_stop`, record cursor/residual
/// (residual is whatever was already stashed by the in-flight wait),
/// transition to `Stopped`. Returns `true` if the task is stopping.
fn observe_stop(inner: &Arc<TaskInner>) -> bool {
    let is_stopping = { inner.lock().state == State::ToStop };
    if !is_stopping {
        return false;
    }
    tracing::debug!(task = inner.id, "stop observed at suspension point");
    fire_head_hook(inner, HeadHook::Stop);
    let mut guard = inner.lock();
    guard.activity = Activity::None;
    guard.state = State::Stopped;
    guard.assert_legal();
    drop(guard);
    inner.notify_state_change();
    true
}

/// Waits for `duration`, honoring stop requests that arrive mid-wait.
/// Returns `false` if the wait was cut short by a stop (the caller must
/// return immediately), `true` if it completed normally.
fn wait_or_stop(inner: &Arc<TaskInner>, duration: Duration) -> bool {
    if duration == Duration::ZERO {
        return !observe_stop(inner);
    }
    let interrupt = crate::wait::Interrupt::new();
    {
        let mut guard = inner.lock();
        guard.activity = Activity::Sleep;
        guard.wait_handle = Some(interrupt.clone());
    }
    inner.notify_state_change();

    // A stop() posted just before we armed wait_handle above would already
    // have flipped state to ToStop without anyone to interrupt; check first.
    if inner.lock().state == State::ToStop {
        let mut guard = inner.lock();
        guard.wait_handle = None;
        // None of `duration` was actually waited out; preserve all of it.
        guard.residual = duration;
        drop(guard);
        return !observe_stop(inner);
    }

    let remaining = interrupt.wait(duration);

    let mut guard = inner.lock();
    guard.wait_handle = None;
    let was_stopping = guard.state == State::ToStop;
    if was_stopping {
        guard.residual = remaining;
    } else {
        guard.residual = Duration::ZERO;
    }
    guard.activity = Activity::None;
    drop(guard);

    if was_stopping {
        tracing::debug!(task = inner.id, remaining_ms = remaining.as_millis(), "stop during wait");
        fire_head_hook(inner, HeadHook::Stop);
        let mut guard = inner.lock();
        guard.state = State::Stopped;
        guard.assert_legal();
        drop(guard);
        inner.notify_state_change();
        false
    } else {
        true
    }
}

fn residual_to_wait(inner: &Arc<TaskInner>) -> Duration {
    inner.lock().residual
}

/// Decides the post-action delay per the task's repeat policy. Returns
/// `None` when the loop/chain should end now.
fn delay_after(inner: &Arc<TaskInner>, cursor: usize, control: Control) -> Option<Duration> {
    let link_duration = inner.lock().chain[cursor].duration.unwrap_or(Duration::ZERO);

    match &inner.repeat_policy {
        RepeatPolicy::Once | RepeatPolicy::Sleep => Some(link_duration),
        RepeatPolicy::Repeated { max } => {
            if control == Control::Stop {
                return None;
            }
            if let Some(max) = max {
                if inner.lock().call_count >= *max {
                    return None;
                }
            }
            match control {
                Control::Delay(d) => Some(d),
                Control::Immediate => Some(Duration::ZERO),
                Control::Stop => None,
            }
        }
        RepeatPolicy::Periodic { max, interval } => {
            if control == Control::Stop {
                return None;
            }
            if let Some(max) = max {
                if inner.lock().call_count >= *max {
                    return None;
                }
            }
            Some(*interval)
        }
    }
}

/// Advances `cursor` for the next step: Repeated/Periodic re-run the same
/// link, everything else moves to the next one.
fn advance_cursor(inner: &Arc<TaskInner>, cursor: usize, _control: Control) {
    let mut guard = inner.lock();
    match inner.repeat_policy {
        RepeatPolicy::Repeated { .. } | RepeatPolicy::Periodic { .. } => {
            // Stays on the same link; the chain for these policies is a
            // single link by construction (see `Task::repeated`/`periodic`).
            guard.cursor = cursor;
        }
        RepeatPolicy::Once | RepeatPolicy::Sleep => {
            guard.cursor = cursor + 1;
        }
    }
}

fn finish(inner: &Arc<TaskInner>) {
    tracing::debug!(task = inner.id, "chain exhausted, finishing");
    fire_head_hook(inner, HeadHook::Final);
    let mut guard = inner.lock();
    guard.activity = Activity::None;
    guard.state = State::Finished;
    guard.assert_legal();
    drop(guard);
    inner.notify_state_change();
    detach_from_parent(inner);
}

/// A finished task removes itself from its parent's children set so a
/// restart doesn't carry forward a parent that no longer needs to track it.
fn detach_from_parent(inner: &Arc<TaskInner>) {
    let parent = inner.parent.lock().unwrap_or_else(|e| e.into_inner()).clone();
    if let Some(parent_inner) = parent.and_then(|weak: Weak<TaskInner>| weak.upgrade()) {
        parent_inner
            .lock()
            .children
            .retain(|c| !Arc::ptr_eq(&c.inner, inner));
    }
}

fn resume_children(inner: &Arc<TaskInner>) {
    let children: Vec<Task> = inner.lock().children.clone();
    for child in children {
        let _ = child.cont();
    }
}

/// Takes a link's `exc_handler` out (leaving `None` behind) so it can be
/// invoked without holding the task's state mutex, then puts it back.
fn try_take_handler(
    inner: &Arc<TaskInner>,
    link_index: usize,
) -> Option<crate::action::BoxedExcHandler> {
    let mut guard = inner.lock();
    guard
        .chain
        .get_mut(link_index)
        .and_then(|link| link.hooks.exc_handler.take())
}

fn restore_handler(inner: &Arc<TaskInner>, link_index: usize, handler: crate::action::BoxedExcHandler) {
    let mut guard = inner.lock();
    if let Some(link) = guard.chain.get_mut(link_index) {
        link.hooks.exc_handler = Some(handler);
    }
}

/// Exception climbing: from the failing link, to the chain head, to each
/// ancestor's head, to the default handler.
fn handle_panic(
    inner: &Arc<TaskInner>,
    cursor: usize,
    payload: Box<dyn std::any::Any + Send>,
) -> Option<Control> {
    tracing::warn!(task = inner.id, link = cursor, "action panicked, climbing for a handler");

    let mut current = Arc::clone(inner);
    let mut at_cursor = Some(cursor);
    let mut payload = payload;

    loop {
        // Try the failing link's own handler first (only meaningful on the
        // first hop, and only if it isn't also the head), then the head's.
        let mut candidates = Vec::new();
        if let Some(idx) = at_cursor.take() {
            if idx != 0 {
                candidates.push(idx);
            }
        }
        candidates.push(0);

        let mut found = None;
        for idx in candidates {
            if let Some(handler) = try_take_handler(&current, idx) {
                found = Some((idx, handler));
                break;
            }
        }

        if let Some((idx, mut handler)) = found {
            handler(payload);
            restore_handler(&current, idx, handler);
            tracing::debug!(task = current.id, "exception handled, resuming executor");
            return Some(Control::Immediate);
        }

        let parent = current.parent.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match parent.and_then(|weak: Weak<TaskInner>| weak.upgrade()) {
            Some(parent_inner) => {
                current = parent_inner;
                at_cursor = None;
            }
            None => {
                tracing::warn!(task = current.id, "no handler found, invoking default handler");
                let handle = Task { inner: current.clone() };
                let _ = handle.stop();
                std::panic::resume_unwind(payload);
            }
        }
    }
}
