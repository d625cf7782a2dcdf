//! Phase transitions for a single task run.
//!
//! The pipeline feeds collaborator results in as [`Event`]s and asks
//! [`transition`] where to go next. Keeping the table pure lets edge cases
//! (immediate test success, planning failure, retry exhaustion) be tested
//! without any agent I/O.

use std::fmt;

use thiserror::Error;

/// Why a run ended in [`Phase::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The planner could not produce a plan.
    Planning,
    /// The first execution of the plan failed.
    Execution,
    /// Every allowed test attempt failed.
    RetriesExhausted,
}

/// Where a run currently is. `attempt` counts TESTING attempts from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Executing { attempt: u32 },
    Testing { attempt: u32 },
    Correcting { attempt: u32 },
    Done,
    Failed(Failure),
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed(_))
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Executing { .. } => "executing",
            Phase::Testing { .. } => "testing",
            Phase::Correcting { .. } => "correcting",
            Phase::Done => "done",
            Phase::Failed(_) => "failed",
        }
    }

    /// Attempt number for the looping phases, `None` otherwise.
    pub fn attempt(self) -> Option<u32> {
        match self {
            Phase::Executing { attempt }
            | Phase::Testing { attempt }
            | Phase::Correcting { attempt } => Some(attempt),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.attempt() {
            Some(attempt) => write!(f, "{}#{}", self.name(), attempt),
            None => f.write_str(self.name()),
        }
    }
}

/// Outcome of the collaborator call made in the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Planned,
    PlanFailed,
    Executed,
    ExecutionFailed,
    TestPassed,
    TestFailed,
    Corrected,
    CorrectionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("phase {0} is terminal")]
    Terminal(Phase),
    #[error("event {event:?} is not valid in phase {phase}")]
    Unexpected { phase: Phase, event: Event },
}

/// Next phase for `event` observed in `phase`, given the retry budget.
///
/// Only the first execution is fatal on failure; a failed fix application
/// still gets tested, because the next correction may recover. A failed
/// correction skips execution and re-tests on the next attempt.
pub fn transition(phase: Phase, event: Event, max_retries: u32) -> Result<Phase, TransitionError> {
    let next = match (phase, event) {
        (Phase::Done | Phase::Failed(_), _) => return Err(TransitionError::Terminal(phase)),
        (Phase::Planning, Event::Planned) => Phase::Executing { attempt: 1 },
        (Phase::Planning, Event::PlanFailed) => Phase::Failed(Failure::Planning),
        (Phase::Executing { attempt: 1 }, Event::ExecutionFailed) => {
            Phase::Failed(Failure::Execution)
        }
        (Phase::Executing { attempt }, Event::Executed | Event::ExecutionFailed) => {
            Phase::Testing { attempt }
        }
        (Phase::Testing { .. }, Event::TestPassed) => Phase::Done,
        (Phase::Testing { attempt }, Event::TestFailed) if attempt >= max_retries => {
            Phase::Failed(Failure::RetriesExhausted)
        }
        (Phase::Testing { attempt }, Event::TestFailed) => Phase::Correcting { attempt },
        (Phase::Correcting { attempt }, Event::Corrected) => Phase::Executing {
            attempt: attempt + 1,
        },
        (Phase::Correcting { attempt }, Event::CorrectionFailed) => Phase::Testing {
            attempt: attempt + 1,
        },
        (phase, event) => return Err(TransitionError::Unexpected { phase, event }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(events: &[Event], max_retries: u32) -> Vec<Phase> {
        let mut phase = Phase::Planning;
        let mut seen = vec![phase];
        for event in events {
            phase = transition(phase, *event, max_retries).expect("valid transition");
            seen.push(phase);
        }
        seen
    }

    #[test]
    fn immediate_test_success_finishes_on_first_attempt() {
        let phases = drive(&[Event::Planned, Event::Executed, Event::TestPassed], 3);
        assert_eq!(
            phases,
            vec![
                Phase::Planning,
                Phase::Executing { attempt: 1 },
                Phase::Testing { attempt: 1 },
                Phase::Done,
            ]
        );
    }

    #[test]
    fn planning_failure_is_terminal() {
        let next = transition(Phase::Planning, Event::PlanFailed, 3).expect("transition");
        assert_eq!(next, Phase::Failed(Failure::Planning));
        assert!(next.is_terminal());
        assert_eq!(
            transition(next, Event::Planned, 3),
            Err(TransitionError::Terminal(next))
        );
    }

    #[test]
    fn first_execution_failure_is_terminal() {
        let next =
            transition(Phase::Executing { attempt: 1 }, Event::ExecutionFailed, 3).expect("ok");
        assert_eq!(next, Phase::Failed(Failure::Execution));
    }

    #[test]
    fn fix_execution_failure_still_tests() {
        let next =
            transition(Phase::Executing { attempt: 2 }, Event::ExecutionFailed, 3).expect("ok");
        assert_eq!(next, Phase::Testing { attempt: 2 });
    }

    #[test]
    fn last_test_failure_exhausts_retries() {
        let events = [
            Event::Planned,
            Event::Executed,
            Event::TestFailed,
            Event::Corrected,
            Event::Executed,
            Event::TestFailed,
            Event::CorrectionFailed,
            Event::TestFailed,
        ];
        let phases = drive(&events, 3);
        assert_eq!(
            phases.last().copied(),
            Some(Phase::Failed(Failure::RetriesExhausted))
        );
        let tests = phases
            .iter()
            .filter(|phase| matches!(phase, Phase::Testing { .. }))
            .count();
        assert_eq!(tests, 3);
    }

    #[test]
    fn single_retry_budget_fails_on_first_test_failure() {
        let phases = drive(&[Event::Planned, Event::Executed, Event::TestFailed], 1);
        assert_eq!(
            phases.last().copied(),
            Some(Phase::Failed(Failure::RetriesExhausted))
        );
    }

    #[test]
    fn correction_failure_advances_attempt() {
        let next =
            transition(Phase::Correcting { attempt: 1 }, Event::CorrectionFailed, 3).expect("ok");
        assert_eq!(next, Phase::Testing { attempt: 2 });
    }

    #[test]
    fn mismatched_event_is_rejected() {
        let err = transition(Phase::Testing { attempt: 1 }, Event::Planned, 3).unwrap_err();
        assert_eq!(
            err,
            TransitionError::Unexpected {
                phase: Phase::Testing { attempt: 1 },
                event: Event::Planned,
            }
        );
    }

    #[test]
    fn display_includes_attempt() {
        assert_eq!(Phase::Testing { attempt: 2 }.to_string(), "testing#2");
        assert_eq!(Phase::Planning.to_string(), "planning");
    }
}
