//! File-backed task table (`task_list.json`).
//!
//! Every mutation is load -> modify -> save of the whole snapshot. The store
//! assumes a single writer process; concurrent writers lose updates
//! (last write wins).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::task::{Task, TaskList, TaskStatus, timestamp_now};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("read task file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("write task file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("parse task file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("serialize task list: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("task {0} not found")]
    NotFound(String),
    #[error("task {0} already exists")]
    DuplicateId(String),
    #[error("task {0} depends on itself")]
    SelfDependency(String),
}

/// Handle to the task file. Cheap to clone; holds no open file.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and deserialize the full collection.
    pub fn load(&self) -> Result<TaskList, StoreError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        let list: TaskList =
            serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), tasks = list.tasks.len(), "task list loaded");
        Ok(list)
    }

    /// Atomically replace the full collection (temp file + rename).
    pub fn save(&self, list: &TaskList) -> Result<(), StoreError> {
        let mut buf = serde_json::to_string_pretty(list).map_err(StoreError::Serialize)?;
        buf.push('\n');
        write_atomic(&self.path, &buf).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), tasks = list.tasks.len(), "task list saved");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Task, StoreError> {
        let list = self.load()?;
        list.find(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Set `status` and refresh `updated_at`.
    ///
    /// Any status other than `failed` also clears a previous `error`, so the
    /// error field is only ever present on failed tasks.
    pub fn update_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError> {
        self.mutate(id, |task| {
            task.status = status;
            if status != TaskStatus::Failed {
                task.error = None;
            }
        })?;
        debug!(task_id = id, %status, "task status updated");
        Ok(())
    }

    /// Mark the task `failed` and record `message`.
    pub fn set_error(&self, id: &str, message: &str) -> Result<(), StoreError> {
        self.mutate(id, |task| {
            task.status = TaskStatus::Failed;
            task.error = Some(message.to_string());
        })?;
        debug!(task_id = id, "task error recorded");
        Ok(())
    }

    /// Append a new task, stamping timestamps. A missing or unreadable store
    /// starts a fresh collection.
    pub fn append(&self, mut task: Task) -> Result<(), StoreError> {
        if task.depends_on_itself() {
            return Err(StoreError::SelfDependency(task.id));
        }
        let mut list = match self.load() {
            Ok(list) => list,
            Err(err) => {
                warn!(err = %err, "task file unavailable, starting an empty task list");
                TaskList::default()
            }
        };
        if list.find(&task.id).is_some() {
            return Err(StoreError::DuplicateId(task.id));
        }
        let now = timestamp_now();
        task.created_at = Some(now);
        task.updated_at = Some(now);
        debug!(task_id = %task.id, "appending task");
        list.tasks.push(task);
        self.save(&list)
    }

    fn mutate<F: FnOnce(&mut Task)>(&self, id: &str, apply: F) -> Result<(), StoreError> {
        let mut list = self.load()?;
        let task = list
            .find_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        apply(task);
        task.updated_at = Some(timestamp_now());
        self.save(&list)
    }
}

fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{task, task_with_deps};
    use chrono::{TimeZone, Utc};

    fn store_in(dir: &tempfile::TempDir) -> TaskStore {
        TaskStore::new(dir.path().join("task_list.json"))
    }

    #[test]
    fn save_then_load_round_trips_every_field() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).single();

        let mut failed = task_with_deps("b", -2, &["a"]);
        failed.status = TaskStatus::Failed;
        failed.error = Some("tests failed".to_string());
        failed.created_at = stamp;
        failed.updated_at = stamp;
        let mut done = task("a", 7);
        done.status = TaskStatus::Completed;
        done.description = "multi\nline".to_string();
        let list = TaskList {
            tasks: vec![failed, done, task("c", 0)],
        };

        store.save(&list).expect("save");
        let loaded = store.load().expect("load");
        assert_eq!(loaded, list);

        store.save(&loaded).expect("save again");
        assert_eq!(store.load().expect("reload"), list);
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = store_in(&temp).load().unwrap_err();
        assert!(matches!(err, StoreError::Read { .. }));
    }

    #[test]
    fn load_malformed_file_is_parse_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        fs::write(store.path(), "{ not json").expect("write");
        let err = store.load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn update_status_unknown_id_leaves_file_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store
            .save(&TaskList {
                tasks: vec![task("a", 1)],
            })
            .expect("save");
        let before = fs::read(store.path()).expect("read before");

        let err = store
            .update_status("missing", TaskStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref id) if id == "missing"));
        assert_eq!(fs::read(store.path()).expect("read after"), before);
    }

    #[test]
    fn update_status_refreshes_timestamp_and_clears_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store.append(task("a", 1)).expect("append");
        store.set_error("a", "boom").expect("set error");

        let failed = store.get("a").expect("get");
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        store
            .update_status("a", TaskStatus::Completed)
            .expect("update");
        let done = store.get("a").expect("get");
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.error.is_none());
        assert!(done.updated_at >= failed.updated_at);
        assert_eq!(done.created_at, failed.created_at);
    }

    #[test]
    fn set_error_unknown_id_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store.append(task("a", 1)).expect("append");
        let err = store.set_error("b", "boom").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn append_bootstraps_missing_store() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        let mut first = task("a", 1);
        first.status = TaskStatus::Pending;
        store.append(first).expect("append");
        store.append(task("b", 2)).expect("append");

        let list = store.load().expect("load");
        let ids: Vec<&str> = list.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        let a = &list.tasks[0];
        assert_eq!(a.status, TaskStatus::Pending);
        assert!(a.created_at.is_some());
        assert_eq!(a.created_at, a.updated_at);
    }

    #[test]
    fn append_treats_corrupt_store_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        fs::write(store.path(), "garbage").expect("write");
        store.append(task("a", 1)).expect("append");
        assert_eq!(store.load().expect("load").tasks.len(), 1);
    }

    #[test]
    fn append_rejects_duplicate_and_self_dependency() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        store.append(task("a", 1)).expect("append");

        let err = store.append(task("a", 2)).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(_)));

        let err = store.append(task_with_deps("s", 0, &["s"])).unwrap_err();
        assert!(matches!(err, StoreError::SelfDependency(_)));
        assert_eq!(store.load().expect("load").tasks.len(), 1);
    }

    #[test]
    fn saved_file_is_pretty_json_with_literal_statuses() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store_in(&temp);
        let mut running = task("a", 1);
        running.status = TaskStatus::InProgress;
        store
            .save(&TaskList {
                tasks: vec![running],
            })
            .expect("save");

        let contents = fs::read_to_string(store.path()).expect("read");
        assert!(contents.starts_with("{\n  \"tasks\": ["));
        assert!(contents.contains("\"status\": \"in_progress\""));
        assert!(contents.ends_with("}\n"));
        assert!(!store.path().with_extension("json.tmp").exists());
    }
}
