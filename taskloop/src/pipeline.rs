//! One task run: plan -> execute -> test -> correct, with a bounded retry cycle.
//!
//! The pipeline owns no storage. It calls the collaborators in [`AgentSet`],
//! turns each result into a [`machine::Event`](crate::core::machine::Event) and
//! lets [`transition`] decide where to go next. Status bookkeeping is done by
//! the caller (see [`crate::looping`]).

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::agents::{AgentSet, CallError};
use crate::core::fix::DebugFix;
use crate::core::machine::{Event, Failure, Phase, TransitionError, transition};
use crate::io::config::OrchestratorConfig;
use crate::prompts::Prompts;
use crate::task::Task;

/// Settings for a single task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum number of TESTING attempts.
    pub max_retries: u32,
    /// Shell command that decides whether the task is done.
    pub test_command: String,
    /// Upper bound for each tool output embedded into a prompt.
    pub prompt_output_budget_bytes: usize,
}

impl From<&OrchestratorConfig> for PipelineConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            test_command: config.test_command.clone(),
            prompt_output_budget_bytes: config.prompt_output_budget_bytes,
        }
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// TESTING attempt that passed (1-indexed).
    pub attempts: u32,
    /// CORRECTING phases entered, whether or not they produced a fix.
    pub corrections: u32,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("planning failed: {reason}")]
    PlanningFailed { reason: String },
    #[error("execution failed: {reason}")]
    ExecutionFailed { reason: String },
    #[error("tests failed after {attempts} attempts: {last_failure}")]
    RetriesExhausted { attempts: u32, last_failure: String },
    #[error("cancelled")]
    Cancelled,
    #[error("render prompt: {0}")]
    Prompt(#[from] minijinja::Error),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl RunError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }
}

/// Drive `task` through the pipeline until it is done, fails, or `cancel` fires.
///
/// - A planning failure is fatal and no execution or test is attempted.
/// - Only the first execution is fatal; a failed fix application still proceeds to testing.
/// - A debugger failure (call or unparsable answer) consumes the attempt but never aborts.
/// - At most `max_retries` tests run.
#[instrument(skip_all, fields(task_id = %task.id))]
pub fn run(
    task: &Task,
    agents: AgentSet<'_>,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<RunReport, RunError> {
    let prompts = Prompts::new(config.prompt_output_budget_bytes);
    let max_retries = config.max_retries.max(1);

    let mut phase = Phase::Planning;
    let mut plan = String::new();
    let mut fix: Option<DebugFix> = None;
    let mut execution_output = String::new();
    let mut failure_output = String::new();
    let mut last_error = String::new();
    let mut corrections = 0u32;

    info!(title = %task.title, max_retries, "task run started");
    loop {
        if cancel.is_cancelled() {
            warn!(%phase, "run cancelled");
            return Err(RunError::Cancelled);
        }

        let event = match phase {
            Phase::Planning => match agents.planner.execute(cancel, &prompts.plan(task)?) {
                Ok(text) => {
                    phase_finished(phase, text.len());
                    plan = text;
                    Event::Planned
                }
                Err(err) => {
                    last_error = call_failed(phase, err)?;
                    Event::PlanFailed
                }
            },
            Phase::Executing { .. } => {
                let prompt = match &fix {
                    Some(fix) => prompts.apply_fix(fix)?,
                    None => prompts.execute(task, &plan)?,
                };
                match agents.executor.execute(cancel, &prompt) {
                    Ok(text) => {
                        phase_finished(phase, text.len());
                        execution_output = text;
                        Event::Executed
                    }
                    // The previous execution output stays as correction context.
                    Err(err) => {
                        last_error = call_failed(phase, err)?;
                        Event::ExecutionFailed
                    }
                }
            }
            Phase::Testing { attempt } => {
                match agents.executor.run_shell(cancel, &config.test_command) {
                    Ok(output) => {
                        info!(%phase, attempt, max_retries, output_len = output.len(), "tests passed");
                        Event::TestPassed
                    }
                    Err(err) if err.is_cancelled() => {
                        warn!(%phase, "run cancelled");
                        return Err(RunError::Cancelled);
                    }
                    Err(err) => {
                        warn!(%phase, attempt, max_retries, err = %err, "tests failed");
                        failure_output = match err.output() {
                            "" => err.to_string(),
                            output => output.to_string(),
                        };
                        last_error = err.to_string();
                        Event::TestFailed
                    }
                }
            }
            Phase::Correcting { .. } => {
                corrections += 1;
                let prompt =
                    prompts.debug(&config.test_command, &failure_output, &execution_output)?;
                match agents.debugger.execute(cancel, &prompt) {
                    Ok(raw) => match DebugFix::parse(&raw) {
                        Ok(parsed) => {
                            phase_finished(phase, raw.len());
                            info!(fix_type = ?parsed.fix_type, analysis = %parsed.analysis, "fix proposed");
                            fix = Some(parsed);
                            Event::Corrected
                        }
                        Err(err) => {
                            warn!(%phase, err = %err, "debugger answer is not a usable fix");
                            Event::CorrectionFailed
                        }
                    },
                    Err(err) => {
                        call_failed(phase, err)?;
                        Event::CorrectionFailed
                    }
                }
            }
            Phase::Done | Phase::Failed(_) => return Err(TransitionError::Terminal(phase).into()),
        };

        let attempt = phase.attempt();
        phase = transition(phase, event, max_retries)?;
        match phase {
            Phase::Done => {
                let attempts = attempt.unwrap_or(1);
                info!(attempts, corrections, "task run succeeded");
                return Ok(RunReport {
                    attempts,
                    corrections,
                });
            }
            Phase::Failed(failure) => {
                let err = match failure {
                    Failure::Planning => RunError::PlanningFailed { reason: last_error },
                    Failure::Execution => RunError::ExecutionFailed { reason: last_error },
                    Failure::RetriesExhausted => RunError::RetriesExhausted {
                        attempts: max_retries,
                        last_failure: last_error,
                    },
                };
                error!(err = %err, "task run failed");
                return Err(err);
            }
            _ => {}
        }
    }
}

fn phase_finished(phase: Phase, output_len: usize) {
    info!(phase = phase.name(), attempt = phase.attempt(), output_len, "phase finished");
}

/// Log a failed collaborator call and return its message, or stop the run
/// when the failure was a cancellation.
fn call_failed(phase: Phase, err: CallError) -> Result<String, RunError> {
    if err.is_cancelled() {
        warn!(%phase, "run cancelled");
        return Err(RunError::Cancelled);
    }
    warn!(phase = phase.name(), attempt = phase.attempt(), err = %err, "call failed");
    Ok(err.to_string())
}
