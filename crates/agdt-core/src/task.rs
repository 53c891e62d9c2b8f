use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle: `Pending → Running → Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// BackgroundTask
// ---------------------------------------------------------------------------

/// One spawned unit of work. Created by the launcher, finished by the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: String,
    /// Display name of the logical operation, e.g. `agdt-git-save-work`.
    pub command: String,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub log_file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub module_path: String,
    #[serde(default)]
    pub function_name: String,
}

impl BackgroundTask {
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        log_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            status: TaskStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
            log_file: log_file.into(),
            error_message: None,
            module_path: String::new(),
            function_name: String::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds since `start_time`, measured against `now`.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.start_time).num_milliseconds() as f64 / 1000.0
    }

    /// Seconds between start and end, once terminal.
    pub fn duration_secs(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }

    pub(crate) fn finish(&mut self, status: TaskStatus, exit_code: i32, message: Option<String>) {
        self.status = status;
        self.exit_code = Some(exit_code);
        self.end_time = Some(Utc::now());
        self.error_message = message;
    }
}

/// Human-readable summary: "3 tasks: 1 running, 1 completed, 1 failed"
pub fn summarize(tasks: &[BackgroundTask]) -> String {
    let count = |s: TaskStatus| tasks.iter().filter(|t| t.status == s).count();
    let active = count(TaskStatus::Pending) + count(TaskStatus::Running);
    format!(
        "{} tasks: {active} running, {} completed, {} failed",
        tasks.len(),
        count(TaskStatus::Completed),
        count(TaskStatus::Failed)
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_lifecycle() {
        let mut task = BackgroundTask::new("t1", "agdt-git-save-work", "/tmp/t1.log");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(!task.is_terminal());

        task.finish(TaskStatus::Failed, 3, Some("boom".into()));
        assert!(task.is_terminal());
        assert_eq!(task.exit_code, Some(3));
        assert!(task.end_time.is_some());
        assert!(task.duration_secs().unwrap() >= 0.0);
    }

    #[test]
    fn serializes_with_snake_case_status_and_omits_unset_fields() {
        let task = BackgroundTask::new("t1", "cmd", "/tmp/t1.log");
        let v = serde_json::to_value(&task).unwrap();
        assert_eq!(v["status"], "pending");
        assert!(v.get("end_time").is_none());
        assert!(v.get("exit_code").is_none());
    }

    #[test]
    fn deserializes_minimal_record() {
        let v = serde_json::json!({
            "id": "t1",
            "command": "cmd",
            "status": "running",
            "start_time": "2024-01-01T00:00:00Z",
            "log_file": "/tmp/t1.log"
        });
        let task: BackgroundTask = serde_json::from_value(v).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.module_path.is_empty());
    }

    #[test]
    fn summary_counts_statuses() {
        let mut a = BackgroundTask::new("a", "x", "a.log");
        a.status = TaskStatus::Running;
        let mut b = BackgroundTask::new("b", "x", "b.log");
        b.finish(TaskStatus::Completed, 0, None);
        assert_eq!(
            summarize(&[a, b]),
            "2 tasks: 1 running, 1 completed, 0 failed"
        );
    }
}
