//! `Link`: one step of a task's chain.

use std::time::Duration;

use crate::action::{empty_action, ArgsBox, BoxedAction, BoxedExcHandler, BoxedHook};

/// The five lifecycle hooks a link (or, for the head link, a whole task) can
/// carry. All optional; each fires at most once per the cycle it names.
#[derive(Default)]
pub struct Hooks {
    pub on_start: Option<BoxedHook>,
    pub on_stop: Option<BoxedHook>,
    pub on_cont: Option<BoxedHook>,
    pub on_final: Option<BoxedHook>,
    pub exc_handler: Option<BoxedExcHandler>,
}

/// One step of a chain: an action, its post-action delay, and its hooks.
///
/// Only the head link's hooks and state are externally addressable — a
/// non-head link is never started directly, so the executor only fires a
/// *link's* `on_start`/`on_stop`/`on_cont`/`on_final` at the head. Each link
/// still keeps its own `exc_handler`, since exception climbing starts at
/// the failing link before it ever reaches the head.
pub struct Link {
    pub(crate) action: BoxedAction,
    pub(crate) args: Option<ArgsBox>,
    pub(crate) duration: Option<Duration>,
    pub(crate) hooks: Hooks,
}

impl Link {
    pub fn new(action: BoxedAction) -> Self {
        Link {
            action,
            args: None,
            duration: None,
            hooks: Hooks::default(),
        }
    }

    /// A link whose entire purpose is its post-action delay — every link in
    /// a `Sleep` task's chain is built this way.
    pub fn sleeping(duration: Duration) -> Self {
        let mut link = Link::new(empty_action());
        link.duration = Some(duration);
        link
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_args(mut self, args: ArgsBox) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}
