//! Test-only helpers: deterministic tasks, scripted collaborators and scratch stores.

use std::cell::RefCell;
use std::collections::VecDeque;

use tokio_util::sync::CancellationToken;

use crate::agents::{Agent, AgentSet, CallError, CommandError, Executor};
use crate::io::task_store::TaskStore;
use crate::task::{Task, TaskList};

/// Create a pending task with a deterministic title and no dependencies.
pub fn task(id: &str, priority: i64) -> Task {
    Task {
        priority,
        description: format!("{id} description"),
        ..Task::new(id, format!("{id} title"))
    }
}

/// Create a pending task that depends on `deps`.
pub fn task_with_deps(id: &str, priority: i64, deps: &[&str]) -> Task {
    Task {
        depends_on: deps.iter().map(|dep| dep.to_string()).collect(),
        ..task(id, priority)
    }
}

/// Agent that replays queued responses and records every prompt it received.
///
/// An exhausted queue answers with [`CallError::EmptyResponse`].
pub struct ScriptedAgent {
    name: &'static str,
    responses: RefCell<VecDeque<Result<String, CallError>>>,
    prompts: RefCell<Vec<String>>,
    cancel_on_call: Option<(usize, CancellationToken)>,
}

impl ScriptedAgent {
    pub fn new(name: &'static str, responses: Vec<Result<String, CallError>>) -> Self {
        Self {
            name,
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
            cancel_on_call: None,
        }
    }

    /// Always answer `text`.
    pub fn replying(name: &'static str, text: &str, times: usize) -> Self {
        Self::new(name, (0..times).map(|_| Ok(text.to_string())).collect())
    }

    /// Fire `token` while handling call number `call` (1-indexed), after
    /// producing its scripted response.
    pub fn cancel_on_call(mut self, call: usize, token: CancellationToken) -> Self {
        self.cancel_on_call = Some((call, token));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        self.name
    }

    fn execute(&self, cancel: &CancellationToken, prompt: &str) -> Result<String, CallError> {
        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        self.prompts.borrow_mut().push(prompt.to_string());
        let response = self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(CallError::EmptyResponse));
        if let Some((call, token)) = &self.cancel_on_call {
            if *call == self.calls() {
                token.cancel();
            }
        }
        response
    }
}

/// Executor whose agent runs and shell commands both replay scripts.
///
/// Shell results are given as `Ok(output)` or `Err(exit_code, output)`; an
/// exhausted shell queue fails with exit code 1.
pub struct ScriptedExecutor {
    pub agent: ScriptedAgent,
    shell: RefCell<VecDeque<Result<String, (i32, String)>>>,
    commands: RefCell<Vec<String>>,
    cancel_on_shell: Option<(usize, CancellationToken)>,
}

impl ScriptedExecutor {
    pub fn new(agent: ScriptedAgent, shell: Vec<Result<String, (i32, String)>>) -> Self {
        Self {
            agent,
            shell: RefCell::new(shell.into()),
            commands: RefCell::new(Vec::new()),
            cancel_on_shell: None,
        }
    }

    /// Fire `token` during shell command number `call` (1-indexed) and report
    /// that command as cancelled.
    pub fn cancel_on_shell(mut self, call: usize, token: CancellationToken) -> Self {
        self.cancel_on_shell = Some((call, token));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    pub fn shell_calls(&self) -> usize {
        self.commands.borrow().len()
    }
}

impl Agent for ScriptedExecutor {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn execute(&self, cancel: &CancellationToken, prompt: &str) -> Result<String, CallError> {
        self.agent.execute(cancel, prompt)
    }
}

impl Executor for ScriptedExecutor {
    fn run_shell(&self, cancel: &CancellationToken, command: &str) -> Result<String, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled);
        }
        self.commands.borrow_mut().push(command.to_string());
        if let Some((call, token)) = &self.cancel_on_shell {
            if *call == self.shell_calls() {
                token.cancel();
                return Err(CommandError::Cancelled);
            }
        }
        match self.shell.borrow_mut().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err((code, output))) => Err(CommandError::Failed {
                code: Some(code),
                output,
            }),
            None => Err(CommandError::Failed {
                code: Some(1),
                output: "no scripted shell result".to_string(),
            }),
        }
    }
}

/// The three scripted collaborators of a run, ready to lend out as an [`AgentSet`].
pub struct ScriptedAgents {
    pub planner: ScriptedAgent,
    pub executor: ScriptedExecutor,
    pub debugger: ScriptedAgent,
}

impl ScriptedAgents {
    pub fn set(&self) -> AgentSet<'_> {
        AgentSet {
            planner: &self.planner,
            executor: &self.executor,
            debugger: &self.debugger,
        }
    }
}

/// A fix object the debugger might return.
pub fn fix_json(content: &str) -> String {
    serde_json::json!({
        "analysis": "the build is broken",
        "fix_type": "code_patch",
        "fix_content": content,
    })
    .to_string()
}

/// Scratch directory holding a task store.
pub struct TestStore {
    dir: tempfile::TempDir,
    store: TaskStore,
}

impl TestStore {
    pub fn new(tasks: Vec<Task>) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = TaskStore::new(dir.path().join("task_list.json"));
        store
            .save(&TaskList { tasks })
            .map_err(std::io::Error::other)?;
        Ok(Self { dir, store })
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn root(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn read(&self) -> TaskList {
        self.store.load().expect("load test store")
    }

    pub fn task(&self, id: &str) -> Task {
        self.store.get(id).expect("task in test store")
    }
}
