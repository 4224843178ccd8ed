//! Chain composition: joining several tasks' chains into one.

use crate::error::Result;
use crate::task::Task;

/// Splices `rest` onto `first`'s chain in order, consuming each of them in
/// turn, and returns `first` as the single resulting head.
///
/// `concat(t1, t2, t3)` is equivalent to `t1.append(&t2)?.append(&t3)`.
pub fn concat(first: Task, rest: &[Task]) -> Result<Task> {
    for other in rest {
        first.append(other)?;
    }
    Ok(first)
}
