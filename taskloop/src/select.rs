//! Selection helper for `taskloop select`.

use crate::core::invariants::{BlockedTask, blocked_tasks};
use crate::core::scheduler::next_pending;
use crate::io::task_store::{StoreError, TaskStore};
use crate::task::Task;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Next task the driver would run.
    Eligible(Task),
    /// No pending tasks remain.
    Drained,
    /// Pending tasks exist but all wait on unfinished dependencies.
    Blocked(Vec<BlockedTask>),
}

/// Select the next task from an in-memory snapshot.
pub fn select_task(tasks: &[Task]) -> SelectOutcome {
    if let Ok(task) = next_pending(tasks) {
        return SelectOutcome::Eligible(task.clone());
    }
    let blocked = blocked_tasks(tasks);
    if blocked.is_empty() {
        SelectOutcome::Drained
    } else {
        SelectOutcome::Blocked(blocked)
    }
}

/// Load the store and select the next task.
pub fn select_from_store(store: &TaskStore) -> Result<SelectOutcome, StoreError> {
    Ok(select_task(&store.load()?.tasks))
}
