//! Project root discovery.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

/// Resolved project layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    /// Absolute project root; agents and shell commands run here.
    pub root: PathBuf,
    pub task_file: PathBuf,
}

impl ProjectPaths {
    pub fn has_task_file(&self) -> bool {
        self.task_file.is_file()
    }
}

/// Resolve `root` to an absolute path and check that it exists.
///
/// A relative `task_file` is taken relative to the resolved root.
pub fn discover(root: &Path, task_file: &Path) -> Result<ProjectPaths> {
    let absolute = std::path::absolute(root)
        .with_context(|| format!("resolve absolute path of {}", root.display()))?;
    if !absolute.is_dir() {
        return Err(anyhow!(
            "project root does not exist: {}",
            absolute.display()
        ));
    }
    let root = absolute.canonicalize().unwrap_or(absolute);
    let task_file = if task_file.is_absolute() {
        task_file.to_path_buf()
    } else {
        root.join(task_file)
    };
    let paths = ProjectPaths { root, task_file };
    info!(
        root = %paths.root.display(),
        task_file = %paths.task_file.display(),
        task_file_found = paths.has_task_file(),
        "project discovered"
    );
    Ok(paths)
}
