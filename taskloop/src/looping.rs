//! Drivers that pair the scheduler with the pipeline: `taskloop continuous` and `taskloop single`.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agents::AgentSet;
use crate::core::invariants::{blocked_tasks, validate_invariants};
use crate::core::scheduler::next_pending;
use crate::io::task_store::{StoreError, TaskStore};
use crate::pipeline::{self, PipelineConfig, RunError, RunReport};
use crate::task::{Task, TaskStatus};

/// Reason why `run_continuous` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// No pending tasks remain.
    Drained,
    /// Pending tasks remain but none is eligible (unfinished or failed
    /// dependencies, or dependency cycles).
    Blocked { pending: Vec<String> },
}

/// Summary of a `run_continuous` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    /// Ids completed during this invocation, in run order.
    pub completed: Vec<String>,
    /// Ids that failed during this invocation, in run order.
    pub failed: Vec<String>,
    pub stop: LoopStop,
}

/// How one task run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    Completed(RunReport),
    Failed(String),
}

/// Reported through the `on_task` callback after each task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub id: String,
    pub title: String,
    pub result: TaskResult,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("task {id} failed: {source}")]
    TaskFailed {
        id: String,
        #[source]
        source: RunError,
    },
}

/// Run eligible tasks one at a time until none is left or `cancel` fires.
///
/// A failed task is recorded with its error and the loop moves on. A task
/// interrupted by cancellation stays `in_progress`. Store failures stop the
/// loop because status can no longer be recorded.
pub fn run_continuous<F: FnMut(&TaskReport)>(
    store: &TaskStore,
    agents: AgentSet<'_>,
    config: &PipelineConfig,
    cancel: &CancellationToken,
    mut on_task: F,
) -> Result<LoopOutcome, DriverError> {
    let mut completed = Vec::new();
    let mut failed = Vec::new();

    for violation in validate_invariants(&store.load()?.tasks) {
        warn!(%violation, "task list invariant violated");
    }

    loop {
        if cancel.is_cancelled() {
            warn!("cancellation requested, stopping loop");
            return Err(DriverError::Cancelled);
        }

        let snapshot = store.load()?;
        let task = match next_pending(&snapshot.tasks) {
            Ok(task) => task.clone(),
            Err(_) => {
                let stop = stop_reason(&snapshot.tasks);
                info!(
                    completed = completed.len(),
                    failed = failed.len(),
                    ?stop,
                    "no eligible task, stopping"
                );
                return Ok(LoopOutcome {
                    completed,
                    failed,
                    stop,
                });
            }
        };

        info!(task_id = %task.id, title = %task.title, priority = task.priority, "picked task");
        store.update_status(&task.id, TaskStatus::InProgress)?;

        let result = match pipeline::run(&task, agents, config, cancel) {
            Ok(report) => {
                store.update_status(&task.id, TaskStatus::Completed)?;
                info!(task_id = %task.id, attempts = report.attempts, "task completed");
                completed.push(task.id.clone());
                TaskResult::Completed(report)
            }
            Err(RunError::Cancelled) => {
                warn!(task_id = %task.id, "task interrupted, left in_progress");
                return Err(DriverError::Cancelled);
            }
            Err(err) => {
                let message = err.to_string();
                error!(task_id = %task.id, err = %message, "task failed");
                store.set_error(&task.id, &message)?;
                failed.push(task.id.clone());
                TaskResult::Failed(message)
            }
        };

        on_task(&TaskReport {
            id: task.id,
            title: task.title,
            result,
        });
    }
}

/// Run one task by id, regardless of its current status or dependencies.
///
/// Success marks it `completed`; a failure is recorded with `set_error` and
/// returned as [`DriverError::TaskFailed`].
pub fn run_single(
    store: &TaskStore,
    agents: AgentSet<'_>,
    config: &PipelineConfig,
    task_id: &str,
    cancel: &CancellationToken,
) -> Result<RunReport, DriverError> {
    let task = store.get(task_id)?;
    if task.status != TaskStatus::Pending {
        warn!(task_id, status = %task.status, "running task that is not pending");
    }
    info!(task_id, title = %task.title, "running single task");

    match pipeline::run(&task, agents, config, cancel) {
        Ok(report) => {
            store.update_status(task_id, TaskStatus::Completed)?;
            info!(task_id, attempts = report.attempts, "task completed");
            Ok(report)
        }
        Err(RunError::Cancelled) => Err(DriverError::Cancelled),
        Err(source) => {
            store.set_error(task_id, &source.to_string())?;
            Err(DriverError::TaskFailed {
                id: task_id.to_string(),
                source,
            })
        }
    }
}

fn stop_reason(tasks: &[Task]) -> LoopStop {
    let blocked = blocked_tasks(tasks);
    if blocked.is_empty() {
        return LoopStop::Drained;
    }
    for task in &blocked {
        if task.in_cycle {
            warn!(task_id = %task.id, waiting_on = ?task.waiting_on, "task is part of a dependency cycle");
        } else {
            warn!(task_id = %task.id, waiting_on = ?task.waiting_on, "task is blocked");
        }
    }
    LoopStop::Blocked {
        pending: blocked.into_iter().map(|task| task.id).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::CallError;
    use crate::test_support::{
        ScriptedAgent, ScriptedAgents, ScriptedExecutor, TestStore, task, task_with_deps,
    };

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_retries: 2,
            test_command: "make test".to_string(),
            prompt_output_budget_bytes: 10_000,
        }
    }

    /// Every task plans, executes and passes its first test.
    fn happy_agents(tasks: usize) -> ScriptedAgents {
        ScriptedAgents {
            planner: ScriptedAgent::replying("planner", "plan", tasks),
            executor: ScriptedExecutor::new(
                ScriptedAgent::replying("executor", "done", tasks),
                (0..tasks).map(|_| Ok("ok".to_string())).collect(),
            ),
            debugger: ScriptedAgent::new("debugger", vec![]),
        }
    }

    #[test]
    fn runs_tasks_in_dependency_then_priority_order() {
        let store = TestStore::new(vec![
            task_with_deps("c", 10, &["b"]),
            task("a", 1),
            task_with_deps("b", 5, &["a"]),
            task("d", 3),
        ])
        .expect("store");
        let agents = happy_agents(4);
        let mut seen = Vec::new();

        let outcome = run_continuous(
            store.store(),
            agents.set(),
            &config(),
            &CancellationToken::new(),
            |report| seen.push(report.id.clone()),
        )
        .expect("loop");

        assert_eq!(outcome.completed, vec!["d", "a", "b", "c"]);
        assert_eq!(seen, outcome.completed);
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.stop, LoopStop::Drained);
        for task in store.read().tasks {
            assert_eq!(task.status, TaskStatus::Completed, "{}", task.id);
        }
    }

    #[test]
    fn failed_task_is_recorded_and_dependents_stay_blocked() {
        let store = TestStore::new(vec![
            task("a", 5),
            task_with_deps("b", 9, &["a"]),
            task("c", 1),
        ])
        .expect("store");
        let agents = ScriptedAgents {
            planner: ScriptedAgent::new(
                "planner",
                vec![
                    Err(CallError::Transport("connection refused".to_string())),
                    Ok("plan".to_string()),
                ],
            ),
            executor: ScriptedExecutor::new(
                ScriptedAgent::replying("executor", "done", 1),
                vec![Ok("ok".to_string())],
            ),
            debugger: ScriptedAgent::new("debugger", vec![]),
        };
        let mut reports = Vec::new();

        let outcome = run_continuous(
            store.store(),
            agents.set(),
            &config(),
            &CancellationToken::new(),
            |report| reports.push(report.clone()),
        )
        .expect("loop");

        assert_eq!(outcome.failed, vec!["a"]);
        assert_eq!(outcome.completed, vec!["c"]);
        assert_eq!(
            outcome.stop,
            LoopStop::Blocked {
                pending: vec!["b".to_string()]
            }
        );
        let failed = store.task("a");
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(
            failed
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with("planning failed"))
        );
        assert_eq!(store.task("b").status, TaskStatus::Pending);
        assert!(matches!(reports[0].result, TaskResult::Failed(_)));
    }

    #[test]
    fn cycle_members_are_reported_as_blocked() {
        let store = TestStore::new(vec![
            task_with_deps("x", 1, &["y"]),
            task_with_deps("y", 1, &["x"]),
        ])
        .expect("store");
        let agents = happy_agents(0);

        let outcome = run_continuous(
            store.store(),
            agents.set(),
            &config(),
            &CancellationToken::new(),
            |_| {},
        )
        .expect("loop");

        assert!(outcome.completed.is_empty());
        assert_eq!(
            outcome.stop,
            LoopStop::Blocked {
                pending: vec!["x".to_string(), "y".to_string()]
            }
        );
        assert_eq!(agents.planner.calls(), 0);
    }

    #[test]
    fn cancellation_leaves_task_in_progress() {
        let store = TestStore::new(vec![task("a", 1), task("b", 0)]).expect("store");
        let cancel = CancellationToken::new();
        let agents = ScriptedAgents {
            planner: ScriptedAgent::replying("planner", "plan", 2).cancel_on_call(1, cancel.clone()),
            executor: ScriptedExecutor::new(ScriptedAgent::new("executor", vec![]), vec![]),
            debugger: ScriptedAgent::new("debugger", vec![]),
        };

        let err = run_continuous(store.store(), agents.set(), &config(), &cancel, |_| {})
            .unwrap_err();

        assert!(matches!(err, DriverError::Cancelled));
        assert_eq!(store.task("a").status, TaskStatus::InProgress);
        assert_eq!(store.task("b").status, TaskStatus::Pending);
        assert_eq!(agents.executor.agent.calls(), 0);
    }

    #[test]
    fn cancelled_before_start_touches_nothing() {
        let store = TestStore::new(vec![task("a", 1)]).expect("store");
        let before = std::fs::read(store.store().path()).expect("read");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run_continuous(store.store(), happy_agents(1).set(), &config(), &cancel, |_| {})
            .unwrap_err();

        assert!(matches!(err, DriverError::Cancelled));
        assert_eq!(std::fs::read(store.store().path()).expect("read"), before);
    }

    #[test]
    fn missing_store_is_a_store_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TaskStore::new(temp.path().join("missing.json"));
        let err = run_continuous(
            &store,
            happy_agents(0).set(),
            &config(),
            &CancellationToken::new(),
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, DriverError::Store(StoreError::Read { .. })));
    }

    #[test]
    fn single_marks_completed_on_success() {
        let store = TestStore::new(vec![task("a", 1), task_with_deps("b", 0, &["a"])])
            .expect("store");
        let agents = happy_agents(1);

        let report = run_single(
            store.store(),
            agents.set(),
            &config(),
            "b",
            &CancellationToken::new(),
        )
        .expect("single");

        assert_eq!(report.attempts, 1);
        assert_eq!(store.task("b").status, TaskStatus::Completed);
        assert_eq!(store.task("a").status, TaskStatus::Pending);
    }

    #[test]
    fn single_unknown_task_is_not_found() {
        let store = TestStore::new(vec![task("a", 1)]).expect("store");
        let agents = happy_agents(0);
        let err = run_single(
            store.store(),
            agents.set(),
            &config(),
            "ghost",
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DriverError::Store(StoreError::NotFound(ref id)) if id == "ghost"));
        assert_eq!(agents.planner.calls(), 0);
    }

    #[test]
    fn single_failure_records_error() {
        let store = TestStore::new(vec![task("a", 1)]).expect("store");
        let agents = ScriptedAgents {
            planner: ScriptedAgent::replying("planner", "plan", 1),
            executor: ScriptedExecutor::new(
                ScriptedAgent::replying("executor", "done", 2),
                vec![Err((1, "FAIL".to_string())), Err((1, "FAIL again".to_string()))],
            ),
            debugger: ScriptedAgent::new("debugger", vec![Ok("not json".to_string())]),
        };

        let err = run_single(
            store.store(),
            agents.set(),
            &config(),
            "a",
            &CancellationToken::new(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            DriverError::TaskFailed {
                source: RunError::RetriesExhausted { .. },
                ..
            }
        ));
        let task = store.task("a");
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().is_some_and(|e| e.contains("FAIL again")));
    }
}
