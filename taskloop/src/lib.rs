//! Autonomous task backlog runner.
//!
//! This crate works through a dependency-ordered backlog (`task_list.json`):
//! it selects the next eligible task, drives it through a bounded
//! plan -> execute -> test -> correct pipeline using pluggable agents, and
//! records the outcome so work resumes across restarts. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (scheduling, snapshot checks, the
//!   phase transition table, fix parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (task file, configuration, project
//!   discovery, process execution).
//! - **[`agents`]**: The collaborator traits and their concrete backends
//!   (chat-completion HTTP APIs, a coding CLI).
//!
//! Orchestration modules ([`pipeline`], [`looping`], [`select`], [`validate`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod pipeline;
pub mod prompts;
pub mod select;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
