//! Stable exit codes for taskloop CLI commands.

/// Command succeeded (or `select` found an eligible task).
pub const OK: i32 = 0;
/// Invalid configuration, unreadable task store, unknown task id, or invariant violations.
pub const INVALID: i32 = 1;
/// `taskloop select` found no eligible task.
pub const NO_ELIGIBLE: i32 = 2;
/// `taskloop single` ran the task and it failed.
pub const TASK_FAILED: i32 = 3;
/// Interrupted by SIGINT/SIGTERM before finishing.
pub const CANCELLED: i32 = 4;
