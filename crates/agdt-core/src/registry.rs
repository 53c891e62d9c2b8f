//! Bookkeeping for background tasks, persisted as `background.tasks` inside
//! the state document.
//!
//! Every mutation goes through [`StateStore::update`], so the list append /
//! remove surface shared by the launcher, the children and the cleanup sweep
//! is serialized by the state lock.

use crate::error::{AgdtError, Result};
use crate::keypath;
use crate::paths;
use crate::state::StateStore;
use crate::task::{BackgroundTask, TaskStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

pub const TASKS_KEY: &str = "background.tasks";
pub const CURRENT_TASK_KEY: &str = "background.task_id";

/// Upper bound on stored task records; the oldest terminal ones go first.
pub const MAX_TASKS: usize = 100;

#[derive(Debug, Clone)]
pub struct TaskRegistry {
    store: StateStore,
}

impl TaskRegistry {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// All tasks, in storage order.
    pub fn get_background_tasks(&self) -> Vec<BackgroundTask> {
        tasks_in(&self.store.load())
    }

    pub fn get_task_by_id(&self, id: &str) -> Option<BackgroundTask> {
        self.get_background_tasks().into_iter().find(|t| t.id == id)
    }

    /// Latest run of every command that is still pending or running,
    /// excluding `exclude_task_id`. Older runs of a command never block.
    pub fn get_incomplete_most_recent_per_command(
        &self,
        exclude_task_id: Option<&str>,
    ) -> Vec<BackgroundTask> {
        most_recent_per_command(self.get_background_tasks())
            .into_iter()
            .filter(|t| !t.is_terminal())
            .filter(|t| Some(t.id.as_str()) != exclude_task_id)
            .collect()
    }

    /// Latest run of every command that failed, excluding one task id and a
    /// set of command names.
    pub fn get_failed_most_recent_per_command(
        &self,
        exclude_task_id: Option<&str>,
        exclude_commands: &[&str],
    ) -> Vec<BackgroundTask> {
        most_recent_per_command(self.get_background_tasks())
            .into_iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .filter(|t| Some(t.id.as_str()) != exclude_task_id)
            .filter(|t| !exclude_commands.contains(&t.command.as_str()))
            .collect()
    }

    /// Every non-terminal task other than `current_task_id`, regardless of recency.
    pub fn get_other_incomplete_tasks(&self, current_task_id: &str) -> Vec<BackgroundTask> {
        self.get_background_tasks()
            .into_iter()
            .filter(|t| !t.is_terminal() && t.id != current_task_id)
            .collect()
    }

    /// The task id remembered from the last launch (or redirected by `wait`).
    pub fn current_task_id(&self) -> Option<String> {
        self.store
            .get(CURRENT_TASK_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
    }

    pub fn remember_task_id(&self, id: &str) -> Result<()> {
        self.store.set(CURRENT_TASK_KEY, Value::String(id.to_string()))
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Append a task and remember it as the current one.
    pub fn add_task(&self, task: &BackgroundTask) -> Result<()> {
        let record = task.clone();
        let id = task.id.clone();
        self.store.update(|doc| {
            let mut tasks = tasks_in(doc);
            tasks.retain(|t| t.id != id);
            tasks.push(record);
            enforce_cap(&mut tasks);
            write_tasks(doc, &tasks)?;
            keypath::set(doc, CURRENT_TASK_KEY, Value::String(id));
            Ok(())
        })
    }

    /// Apply `f` to the task with `id` and persist it.
    pub fn update_task(
        &self,
        id: &str,
        f: impl FnOnce(&mut BackgroundTask),
    ) -> Result<BackgroundTask> {
        self.store.update(|doc| {
            let mut tasks = tasks_in(doc);
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| AgdtError::TaskNotFound(id.to_string()))?;
            f(task);
            let updated = task.clone();
            write_tasks(doc, &tasks)?;
            Ok(updated)
        })
    }

    pub fn mark_running(&self, id: &str) -> Result<BackgroundTask> {
        self.update_task(id, |t| t.status = TaskStatus::Running)
    }

    pub fn mark_completed(&self, id: &str) -> Result<BackgroundTask> {
        self.update_task(id, |t| t.finish(TaskStatus::Completed, 0, None))
    }

    pub fn mark_failed(
        &self,
        id: &str,
        exit_code: i32,
        message: impl Into<String>,
    ) -> Result<BackgroundTask> {
        let message = message.into();
        self.update_task(id, |t| {
            t.finish(TaskStatus::Failed, exit_code, Some(message))
        })
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Drop terminal tasks started more than `retention_hours` ago together
    /// with their log and bootstrap files. Non-terminal tasks never expire.
    pub fn cleanup_expired_tasks(&self, retention_hours: f64) -> Result<usize> {
        let Some(cutoff) = retention_cutoff(retention_hours) else {
            // Reaches back past any representable start time.
            return Ok(0);
        };
        let state_dir = self.store.dir().to_path_buf();

        let expired = self.store.update(|doc| {
            let (expired, kept): (Vec<_>, Vec<_>) = tasks_in(doc)
                .into_iter()
                .partition(|t| t.is_terminal() && t.start_time < cutoff);
            if !expired.is_empty() {
                write_tasks(doc, &kept)?;
            }
            Ok(expired)
        })?;

        for task in &expired {
            remove_quietly(&task.log_file);
            remove_quietly(&paths::task_bootstrap_path(&state_dir, &task.id));
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), retention_hours, "removed expired background tasks");
        }
        Ok(expired.len())
    }

    /// Delete log/bootstrap files older than `max_age_hours` whose task
    /// record no longer exists.
    pub fn cleanup_old_logs(&self, max_age_hours: f64) -> Result<usize> {
        let dir = paths::tasks_dir(self.store.dir());
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let known: HashSet<String> = self
            .get_background_tasks()
            .into_iter()
            .map(|t| t.id)
            .collect();
        let Some(max_age) = hours_to_duration(max_age_hours) else {
            return Ok(0);
        };
        let now = SystemTime::now();

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_task_file = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("log") | Some("toml")
            );
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_task_file || known.contains(stem) {
                continue;
            }
            let old_enough = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|modified| now.duration_since(modified).unwrap_or_default() >= max_age)
                .unwrap_or(false);
            if old_enough && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(count = removed, "removed orphaned task logs");
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn hours_to_duration(hours: f64) -> Option<Duration> {
    if hours.is_nan() {
        return None;
    }
    Duration::try_from_secs_f64(hours.max(0.0) * 3600.0).ok()
}

fn retention_cutoff(hours: f64) -> Option<DateTime<Utc>> {
    let span = chrono::Duration::from_std(hours_to_duration(hours)?).ok()?;
    Utc::now().checked_sub_signed(span)
}

fn tasks_in(doc: &Value) -> Vec<BackgroundTask> {
    let Some(items) = keypath::get(doc, TASKS_KEY).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed task record");
                None
            }
        })
        .collect()
}

fn write_tasks(doc: &mut Value, tasks: &[BackgroundTask]) -> Result<()> {
    keypath::set(doc, TASKS_KEY, serde_json::to_value(tasks)?);
    Ok(())
}

/// Keep only the latest task (by `start_time`, later storage position wins
/// ties) of each command, in order of each command's first appearance.
fn most_recent_per_command(tasks: Vec<BackgroundTask>) -> Vec<BackgroundTask> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, BackgroundTask> = HashMap::new();
    for task in tasks {
        match latest.get(&task.command) {
            Some(existing) if existing.start_time > task.start_time => {}
            Some(_) => {
                latest.insert(task.command.clone(), task);
            }
            None => {
                order.push(task.command.clone());
                latest.insert(task.command.clone(), task);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|cmd| latest.remove(&cmd))
        .collect()
}

fn enforce_cap(tasks: &mut Vec<BackgroundTask>) {
    while tasks.len() > MAX_TASKS {
        let oldest_terminal = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_terminal())
            .min_by_key(|(_, t)| t.start_time)
            .map(|(i, _)| i);
        match oldest_terminal {
            Some(i) => {
                tasks.remove(i);
            }
            None => break,
        }
    }
}

fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = crate::io::remove_if_exists(path) {
        tracing::warn!(path = %path.display(), error = %e, "could not remove task file");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration as ChronoDuration};
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> TaskRegistry {
        TaskRegistry::new(StateStore::new(dir.path().join("temp")))
    }

    fn task_at(
        id: &str,
        command: &str,
        status: TaskStatus,
        start: DateTime<Utc>,
    ) -> BackgroundTask {
        let mut t = BackgroundTask::new(id, command, format!("/nonexistent/{id}.log"));
        t.status = status;
        t.start_time = start;
        t
    }

    #[test]
    fn add_and_fetch() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let task = BackgroundTask::new("t1", "agdt-git-save-work", "/tmp/t1.log");
        reg.add_task(&task).unwrap();

        assert_eq!(reg.get_background_tasks().len(), 1);
        assert_eq!(reg.get_task_by_id("t1").unwrap().command, "agdt-git-save-work");
        assert!(reg.get_task_by_id("nope").is_none());
        assert_eq!(reg.current_task_id().as_deref(), Some("t1"));
    }

    #[test]
    fn mark_failed_records_exit_code() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.add_task(&BackgroundTask::new("t1", "c", "/tmp/t1.log")).unwrap();
        reg.mark_running("t1").unwrap();
        let t = reg.mark_failed("t1", 3, "exit 3").unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.exit_code, Some(3));
        assert_eq!(t.error_message.as_deref(), Some("exit 3"));
        assert!(matches!(
            reg.mark_completed("missing"),
            Err(AgdtError::TaskNotFound(_))
        ));
    }

    #[test]
    fn most_recent_per_command_only_considers_latest_run() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        reg.add_task(&task_at("a1", "A", TaskStatus::Failed, now - ChronoDuration::minutes(3))).unwrap();
        reg.add_task(&task_at("a2", "A", TaskStatus::Completed, now - ChronoDuration::minutes(2))).unwrap();
        reg.add_task(&task_at("a3", "A", TaskStatus::Running, now - ChronoDuration::minutes(1))).unwrap();

        let incomplete = reg.get_incomplete_most_recent_per_command(None);
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, "a3");

        assert!(reg.get_failed_most_recent_per_command(None, &[]).is_empty());
    }

    #[test]
    fn stale_running_run_does_not_block_when_rerun_completed() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        reg.add_task(&task_at("b1", "B", TaskStatus::Running, now - ChronoDuration::minutes(5))).unwrap();
        reg.add_task(&task_at("b2", "B", TaskStatus::Completed, now)).unwrap();
        assert!(reg.get_incomplete_most_recent_per_command(None).is_empty());
        assert_eq!(reg.get_other_incomplete_tasks("b2").len(), 1);
    }

    #[test]
    fn exclusion_semantics() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        reg.add_task(&task_at("t", "X", TaskStatus::Failed, now)).unwrap();
        reg.add_task(&task_at("c1", "C", TaskStatus::Failed, now)).unwrap();
        reg.add_task(&task_at("d1", "D", TaskStatus::Failed, now)).unwrap();

        let failed = reg.get_failed_most_recent_per_command(Some("t"), &["C"]);
        let ids: Vec<&str> = failed.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["d1"]);

        let incomplete_excluded = reg.get_incomplete_most_recent_per_command(Some("t"));
        assert!(incomplete_excluded.is_empty());
    }

    #[test]
    fn cleanup_skips_in_flight_tasks() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let old = Utc::now() - ChronoDuration::hours(48);

        let log = dir.path().join("old.log");
        std::fs::write(&log, "output").unwrap();
        let mut done = task_at("done", "A", TaskStatus::Completed, old);
        done.log_file = log.clone();
        reg.add_task(&done).unwrap();
        reg.add_task(&task_at("hung", "B", TaskStatus::Running, old)).unwrap();
        reg.add_task(&task_at("fresh", "C", TaskStatus::Completed, Utc::now())).unwrap();

        assert_eq!(reg.cleanup_expired_tasks(24.0).unwrap(), 1);
        assert!(!log.exists());
        let ids: Vec<String> = reg.get_background_tasks().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["hung".to_string(), "fresh".to_string()]);
    }

    #[test]
    fn huge_retention_keeps_everything() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let old = Utc::now() - ChronoDuration::hours(48);
        reg.add_task(&task_at("done", "A", TaskStatus::Completed, old)).unwrap();

        let tasks_dir = paths::tasks_dir(reg.store().dir());
        std::fs::create_dir_all(&tasks_dir).unwrap();
        std::fs::write(tasks_dir.join("gone.log"), "keep").unwrap();

        for hours in [1e12, 1e300, f64::INFINITY, f64::NAN] {
            assert_eq!(reg.cleanup_expired_tasks(hours).unwrap(), 0);
            assert_eq!(reg.cleanup_old_logs(hours).unwrap(), 0);
        }
        assert_eq!(reg.get_background_tasks().len(), 1);
        assert!(tasks_dir.join("gone.log").exists());
    }

    #[test]
    fn cleanup_old_logs_removes_only_orphans() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.add_task(&BackgroundTask::new("live", "A", "x.log")).unwrap();

        let tasks_dir = paths::tasks_dir(reg.store().dir());
        std::fs::create_dir_all(&tasks_dir).unwrap();
        std::fs::write(tasks_dir.join("live.log"), "keep").unwrap();
        std::fs::write(tasks_dir.join("gone.log"), "drop").unwrap();
        std::fs::write(tasks_dir.join("gone.toml"), "drop").unwrap();
        std::fs::write(tasks_dir.join("notes.txt"), "keep").unwrap();

        assert_eq!(reg.cleanup_old_logs(0.0).unwrap(), 2);
        assert!(tasks_dir.join("live.log").exists());
        assert!(tasks_dir.join("notes.txt").exists());
        assert!(!tasks_dir.join("gone.log").exists());
    }

    #[test]
    fn cap_drops_oldest_terminal_first() {
        let mut tasks: Vec<BackgroundTask> = Vec::new();
        let base = Utc::now() - ChronoDuration::hours(10);
        tasks.push(task_at("running-oldest", "R", TaskStatus::Running, base));
        for i in 0..MAX_TASKS {
            tasks.push(task_at(
                &format!("t{i}"),
                "C",
                TaskStatus::Completed,
                base + ChronoDuration::seconds(i as i64 + 1),
            ));
        }
        enforce_cap(&mut tasks);
        assert_eq!(tasks.len(), MAX_TASKS);
        assert!(tasks.iter().any(|t| t.id == "running-oldest"));
        assert!(!tasks.iter().any(|t| t.id == "t0"));
    }
}
