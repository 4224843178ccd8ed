//! Process-wide task id counter, used only for human-readable logging.
//! The only global state the crate carries.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next task id. Monotonic, never reused.
pub(crate) fn next_task_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}
