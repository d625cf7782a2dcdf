//! Validation helper for `taskloop validate`.

use crate::core::invariants::{BlockedTask, blocked_tasks, validate_invariants};
use crate::io::task_store::{StoreError, TaskStore};

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub tasks: usize,
    /// Duplicate ids, self-dependencies and unknown dependencies.
    pub violations: Vec<String>,
    /// Pending tasks caught in dependency cycles. Not a violation: they are
    /// never scheduled, but the file is still usable.
    pub cycles: Vec<BlockedTask>,
}

impl ValidateOutcome {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Load the store and check snapshot invariants.
pub fn validate_store(store: &TaskStore) -> Result<ValidateOutcome, StoreError> {
    let list = store.load()?;
    let cycles = blocked_tasks(&list.tasks)
        .into_iter()
        .filter(|task| task.in_cycle)
        .collect();
    Ok(ValidateOutcome {
        tasks: list.tasks.len(),
        violations: validate_invariants(&list.tasks),
        cycles,
    })
}
