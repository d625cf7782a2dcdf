//! Collaborator capabilities used by the pipeline.
//!
//! Every collaborator is "execute a prompt, return text or fail". The
//! [`Executor`] additionally runs shell commands in the project root. Concrete
//! backends (chat-completion HTTP APIs, a coding CLI) live in the submodules
//! and are chosen by configuration; the pipeline only sees the traits.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::io::process::ProcessError;

pub mod chat;
pub mod cli;
pub mod debugger;
pub mod planner;
pub mod retry;

/// A collaborator that turns a prompt into text.
pub trait Agent {
    fn name(&self) -> &str;

    /// Run `prompt`. Must return [`CallError::Cancelled`] without doing any
    /// work when `cancel` has already fired.
    fn execute(&self, cancel: &CancellationToken, prompt: &str) -> Result<String, CallError>;
}

/// The executing collaborator: an agent that can also run shell commands.
pub trait Executor: Agent {
    /// Run `command` through the shell in the project root and return its
    /// combined output. A non-zero exit is [`CommandError::Failed`].
    fn run_shell(&self, cancel: &CancellationToken, command: &str)
    -> Result<String, CommandError>;
}

/// The three collaborators a task run needs.
#[derive(Clone, Copy)]
pub struct AgentSet<'a> {
    pub planner: &'a dyn Agent,
    pub executor: &'a dyn Executor,
    pub debugger: &'a dyn Agent,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("cancelled")]
    Cancelled,
    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("API call failed: {0}")]
    Transport(String),
    #[error("decode response: {0}")]
    Decode(String),
    #[error("no choices in API response")]
    EmptyResponse,
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<CallError> },
}

impl CallError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            CallError::Cancelled => true,
            CallError::Command(err) => err.is_cancelled(),
            CallError::RetriesExhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("cancelled")]
    Cancelled,
    #[error("command timed out after {timeout:?}: {}", output_tail(output))]
    TimedOut { timeout: Duration, output: String },
    #[error("command exited with status {}: {}", code_label(*code), output_tail(output))]
    Failed { code: Option<i32>, output: String },
    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl CommandError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommandError::Cancelled)
    }

    /// Output captured before the command failed (empty when none was captured).
    pub fn output(&self) -> &str {
        match self {
            CommandError::TimedOut { output, .. } | CommandError::Failed { output, .. } => output,
            CommandError::Cancelled | CommandError::Process(_) => "",
        }
    }
}

/// Lines kept from command output in error messages.
const ERROR_TAIL_LINES: usize = 20;

fn output_tail(output: &str) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
    if lines.is_empty() {
        return "(no output)".to_string();
    }
    lines[start..].join("\n")
}

fn code_label(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |code| code.to_string())
}
