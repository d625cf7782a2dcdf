//! I/O helpers: task file, configuration, project layout, child processes.

pub mod config;
pub mod process;
pub mod project;
pub mod task_store;
