//! Deterministic selection of the next eligible task.

use std::collections::HashSet;

use thiserror::Error;

use crate::task::{Task, TaskStatus};

/// No pending task has all of its dependencies completed.
///
/// Raised both for an empty backlog and for one whose pending tasks are all
/// blocked; callers tell the two apart by inspecting the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no eligible task")]
pub struct NoEligibleTask;

/// Pick the highest-priority pending task whose dependencies are all completed.
///
/// Ties resolve to the task listed first: a later candidate only replaces the
/// current best on a strictly greater priority.
pub fn next_pending(tasks: &[Task]) -> Result<&Task, NoEligibleTask> {
    let completed = completed_ids(tasks);
    let mut best: Option<&Task> = None;
    for task in tasks {
        if !is_eligible(task, &completed) {
            continue;
        }
        match best {
            Some(current) if task.priority <= current.priority => {}
            _ => best = Some(task),
        }
    }
    best.ok_or(NoEligibleTask)
}

/// Ids of every task with `status == completed`.
pub fn completed_ids(tasks: &[Task]) -> HashSet<&str> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Completed)
        .map(|task| task.id.as_str())
        .collect()
}

/// Pending and every dependency completed.
pub fn is_eligible(task: &Task, completed: &HashSet<&str>) -> bool {
    task.status == TaskStatus::Pending
        && task
            .depends_on
            .iter()
            .all(|dep| completed.contains(dep.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task, task_with_deps};

    #[test]
    fn empty_backlog_has_no_eligible_task() {
        assert_eq!(next_pending(&[]), Err(NoEligibleTask));
    }

    #[test]
    fn dependency_gating_overrides_priority_until_unblocked() {
        let mut tasks = vec![
            task_with_deps("A", 1, &[]),
            task_with_deps("B", 5, &["A"]),
            task_with_deps("C", 3, &[]),
        ];

        let first = next_pending(&tasks).expect("first pick");
        assert_eq!(first.id, "C");

        tasks[0].status = TaskStatus::Completed;
        let second = next_pending(&tasks).expect("second pick");
        assert_eq!(second.id, "B");
    }

    #[test]
    fn ties_resolve_to_first_listed_candidate() {
        let tasks = vec![task("low", 1), task("first", 7), task("second", 7)];
        assert_eq!(next_pending(&tasks).expect("pick").id, "first");
    }

    #[test]
    fn negative_priorities_are_still_candidates() {
        let tasks = vec![task("neg", -3), task("more-neg", -10)];
        assert_eq!(next_pending(&tasks).expect("pick").id, "neg");
    }

    #[test]
    fn non_pending_tasks_are_never_selected() {
        let mut done = task("done", 10);
        done.status = TaskStatus::Completed;
        let mut running = task("running", 9);
        running.status = TaskStatus::InProgress;
        let mut broken = task("broken", 8);
        broken.status = TaskStatus::Failed;
        let tasks = vec![done, running, broken, task("todo", 0)];

        assert_eq!(next_pending(&tasks).expect("pick").id, "todo");
    }

    #[test]
    fn failed_dependency_keeps_dependent_blocked() {
        let mut dep = task("dep", 0);
        dep.status = TaskStatus::Failed;
        let tasks = vec![dep, task_with_deps("child", 5, &["dep"])];
        assert_eq!(next_pending(&tasks), Err(NoEligibleTask));
    }

    #[test]
    fn unknown_dependency_blocks_forever() {
        let tasks = vec![task_with_deps("orphan", 1, &["missing"])];
        assert_eq!(next_pending(&tasks), Err(NoEligibleTask));
    }

    #[test]
    fn cycle_members_are_never_eligible() {
        let tasks = vec![
            task_with_deps("x", 1, &["y"]),
            task_with_deps("y", 1, &["x"]),
        ];
        assert_eq!(next_pending(&tasks), Err(NoEligibleTask));
    }

    #[test]
    fn selection_never_returns_unmet_dependency() {
        // Exhaustive over a small grid of statuses for a two-level chain.
        let statuses = [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ];
        for root_status in statuses {
            for mid_status in statuses {
                let mut root = task("root", 1);
                root.status = root_status;
                let mut mid = task_with_deps("mid", 2, &["root"]);
                mid.status = mid_status;
                let leaf = task_with_deps("leaf", 3, &["mid", "root"]);
                let tasks = vec![root, mid, leaf];

                let completed = completed_ids(&tasks);
                if let Ok(picked) = next_pending(&tasks) {
                    assert_eq!(picked.status, TaskStatus::Pending);
                    assert!(
                        picked
                            .depends_on
                            .iter()
                            .all(|dep| completed.contains(dep.as_str()))
                    );
                    let best = tasks
                        .iter()
                        .filter(|t| is_eligible(t, &completed))
                        .map(|t| t.priority)
                        .max()
                        .expect("at least one candidate");
                    assert_eq!(picked.priority, best);
                }
            }
        }
    }
}
