//! Executing collaborator backed by a coding CLI (e.g. `claude -p`).

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::{Agent, CallError, CommandError, Executor};
use crate::io::config::ExecutorConfig;
use crate::io::process::{CommandOutput, Termination, run_command};

/// Runs the configured CLI with the prompt on stdin, and shell commands via `sh -c`,
/// both in the project root.
pub struct CliExecutor {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CliExecutor {
    pub fn new(config: &ExecutorConfig, workdir: &Path) -> Self {
        // An empty command surfaces as a spawn error on first use.
        let (program, args) = match config.command.split_first() {
            Some((program, args)) => (program.clone(), args.to_vec()),
            None => (String::new(), Vec::new()),
        };
        Self {
            program,
            args,
            workdir: workdir.to_path_buf(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn run(
        &self,
        mut cmd: Command,
        stdin: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<String, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled);
        }
        cmd.current_dir(&self.workdir);
        let output = run_command(cmd, stdin, self.timeout, self.output_limit_bytes, cancel)?;
        self.interpret(&output)
    }

    fn interpret(&self, output: &CommandOutput) -> Result<String, CommandError> {
        match output.termination {
            Termination::Cancelled => Err(CommandError::Cancelled),
            Termination::TimedOut => Err(CommandError::TimedOut {
                timeout: self.timeout,
                output: output.combined(),
            }),
            Termination::Exited(status) if status.success() => Ok(output.combined()),
            Termination::Exited(status) => Err(CommandError::Failed {
                code: status.code(),
                output: output.combined(),
            }),
        }
    }
}

impl Agent for CliExecutor {
    fn name(&self) -> &str {
        "executor"
    }

    #[instrument(skip_all, fields(program = %self.program, prompt_len = prompt.len()))]
    fn execute(&self, cancel: &CancellationToken, prompt: &str) -> Result<String, CallError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        let output = self.run(cmd, Some(prompt.as_bytes()), cancel)?;
        info!(output_len = output.len(), "executor finished");
        Ok(output)
    }
}

impl Executor for CliExecutor {
    #[instrument(skip_all, fields(command = %command))]
    fn run_shell(&self, cancel: &CancellationToken, command: &str) -> Result<String, CommandError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        self.run(cmd, None, cancel)
    }
}
