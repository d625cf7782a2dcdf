//! Data-quality checks over a task snapshot.
//!
//! None of these block scheduling: a bad backlog simply leaves tasks
//! ineligible. They exist so operators can see why.

use std::collections::{HashMap, HashSet};

use crate::core::scheduler::completed_ids;
use crate::task::{Task, TaskStatus};

/// Check invariants the file format cannot express:
/// - No duplicate ids
/// - No task depending on itself
/// - No dependency on an id that is not in the store
pub fn validate_invariants(tasks: &[Task]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let known: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();

    for (index, task) in tasks.iter().enumerate() {
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate id '{}' at index {}", task.id, index));
        }
        if task.depends_on_itself() {
            errors.push(format!("{}: depends on itself", task.id));
        }
        for dep in &task.depends_on {
            if dep != &task.id && !known.contains(dep.as_str()) {
                errors.push(format!("{}: depends on unknown task '{}'", task.id, dep));
            }
        }
    }

    errors
}

/// A pending task that cannot currently be scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedTask {
    pub id: String,
    /// Dependencies that are not yet `completed`, in declaration order.
    pub waiting_on: Vec<String>,
    /// The task can reach itself through `depends_on` edges.
    pub in_cycle: bool,
}

/// List pending tasks with at least one unmet dependency.
pub fn blocked_tasks(tasks: &[Task]) -> Vec<BlockedTask> {
    let completed = completed_ids(tasks);
    let edges: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|task| (task.id.as_str(), task.depends_on.as_slice()))
        .collect();

    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending)
        .filter_map(|task| {
            let waiting_on: Vec<String> = task
                .depends_on
                .iter()
                .filter(|dep| !completed.contains(dep.as_str()))
                .cloned()
                .collect();
            if waiting_on.is_empty() {
                return None;
            }
            Some(BlockedTask {
                id: task.id.clone(),
                waiting_on,
                in_cycle: reaches_itself(&task.id, &edges),
            })
        })
        .collect()
}

fn reaches_itself(start: &str, edges: &HashMap<&str, &[String]>) -> bool {
    let mut stack: Vec<&str> = Vec::new();
    let mut visited = HashSet::new();
    if let Some(deps) = edges.get(start) {
        stack.extend(deps.iter().map(String::as_str));
    }
    while let Some(id) = stack.pop() {
        if id == start {
            return true;
        }
        if !visited.insert(id) {
            continue;
        }
        if let Some(deps) = edges.get(id) {
            stack.extend(deps.iter().map(String::as_str));
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task, task_with_deps};

    #[test]
    fn clean_backlog_has_no_violations() {
        let tasks = vec![task("a", 1), task_with_deps("b", 2, &["a"])];
        assert!(validate_invariants(&tasks).is_empty());
    }

    #[test]
    fn reports_duplicates_self_and_unknown_dependencies() {
        let tasks = vec![
            task("dup", 1),
            task("dup", 2),
            task_with_deps("selfish", 0, &["selfish"]),
            task_with_deps("orphan", 0, &["ghost"]),
        ];

        let errors = validate_invariants(&tasks);
        assert!(errors.iter().any(|err| err.contains("duplicate id 'dup'")));
        assert!(errors.iter().any(|err| err.contains("selfish: depends on itself")));
        assert!(errors.iter().any(|err| err.contains("unknown task 'ghost'")));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn blocked_tasks_flag_cycles() {
        let mut done = task("done", 0);
        done.status = TaskStatus::Completed;
        let tasks = vec![
            done,
            task_with_deps("x", 1, &["y"]),
            task_with_deps("y", 1, &["x", "done"]),
            task_with_deps("z", 1, &["x"]),
            task_with_deps("ready", 1, &["done"]),
        ];

        let blocked = blocked_tasks(&tasks);
        let ids: Vec<&str> = blocked.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
        assert!(blocked[0].in_cycle);
        assert!(blocked[1].in_cycle);
        assert_eq!(blocked[1].waiting_on, vec!["x".to_string()]);
        assert!(!blocked[2].in_cycle);
    }

    #[test]
    fn failed_dependencies_block_without_cycle() {
        let mut broken = task("broken", 0);
        broken.status = TaskStatus::Failed;
        let tasks = vec![broken, task_with_deps("next", 0, &["broken"])];

        let blocked = blocked_tasks(&tasks);
        assert_eq!(
            blocked,
            vec![BlockedTask {
                id: "next".to_string(),
                waiting_on: vec!["broken".to_string()],
                in_cycle: false,
            }]
        );
    }
}
