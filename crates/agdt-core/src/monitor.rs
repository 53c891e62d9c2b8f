//! `task-wait`: poll a background task a bounded number of times, then
//! decide what the caller should do next.
//!
//! One call never blocks for longer than about `MAX_POLLS * wait_interval`;
//! the driver re-invokes it until the task is terminal.

use crate::error::{AgdtError, Result};
use crate::launcher::BackgroundLauncher;
use crate::registry::TaskRegistry;
use crate::settings::BackgroundSettings;
use crate::task::{BackgroundTask, TaskStatus};
use crate::workflow::{self, AutoAdvance};
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;

/// Sleeps per invocation before reporting "still running".
pub const MAX_POLLS: u32 = 2;

#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Task to wait on; `None` uses the remembered `background.task_id`.
    pub task_id: Option<String>,
    pub wait_interval: Duration,
    pub timeout: Duration,
    /// Log lines included for a failed task; `0` includes everything.
    pub log_lines: usize,
}

impl WaitOptions {
    pub fn from_settings(task_id: Option<String>, settings: &BackgroundSettings) -> Self {
        Self {
            task_id,
            wait_interval: settings.wait_interval_duration(),
            timeout: settings.timeout_duration(),
            log_lines: settings.log_lines,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WaitOutcome {
    /// Still running past `timeout`. An observation only; the child keeps going.
    TimedOut {
        task: BackgroundTask,
        elapsed_secs: f64,
    },
    /// Still running after the poll budget; call again.
    StillRunning { task: BackgroundTask },
    Failed {
        task: BackgroundTask,
        exit_code: i32,
        log: Option<String>,
    },
    /// Completed, but other commands still have a run in flight. The first
    /// of them is now the remembered task.
    WaitFor {
        task: BackgroundTask,
        next: Vec<BackgroundTask>,
    },
    /// Completed, but the latest run of another command failed.
    ReviewFailures {
        task: BackgroundTask,
        failed: Vec<BackgroundTask>,
    },
    Advanced {
        task: BackgroundTask,
        advance: AutoAdvance,
    },
    /// Completed; the active workflow is waiting on its driver.
    NextPrompt {
        task: BackgroundTask,
        workflow: String,
        step: String,
    },
    Done { task: BackgroundTask },
}

impl WaitOutcome {
    pub fn task(&self) -> &BackgroundTask {
        match self {
            WaitOutcome::TimedOut { task, .. }
            | WaitOutcome::StillRunning { task }
            | WaitOutcome::Failed { task, .. }
            | WaitOutcome::WaitFor { task, .. }
            | WaitOutcome::ReviewFailures { task, .. }
            | WaitOutcome::Advanced { task, .. }
            | WaitOutcome::NextPrompt { task, .. }
            | WaitOutcome::Done { task } => task,
        }
    }

    /// Process exit code for the waiter: the failed task's own code, else 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            WaitOutcome::Failed { exit_code, .. } => *exit_code,
            _ => 0,
        }
    }
}

fn fetch(registry: &TaskRegistry, id: &str) -> Result<BackgroundTask> {
    registry
        .get_task_by_id(id)
        .ok_or_else(|| AgdtError::TaskNotFound(id.to_string()))
}

pub fn wait<L: BackgroundLauncher + ?Sized>(
    registry: &TaskRegistry,
    launcher: &L,
    opts: &WaitOptions,
) -> Result<WaitOutcome> {
    let id = opts
        .task_id
        .clone()
        .or_else(|| registry.current_task_id())
        .ok_or(AgdtError::NoTaskId)?;

    let mut task = fetch(registry, &id)?;
    let mut polls = 0;
    while !task.is_terminal() {
        let elapsed_secs = task.elapsed_secs(Utc::now());
        if elapsed_secs > opts.timeout.as_secs_f64() {
            tracing::warn!(task_id = %id, elapsed_secs, "background task exceeded timeout");
            return Ok(WaitOutcome::TimedOut { task, elapsed_secs });
        }
        if polls == MAX_POLLS {
            return Ok(WaitOutcome::StillRunning { task });
        }
        std::thread::sleep(opts.wait_interval);
        polls += 1;
        task = fetch(registry, &id)?;
    }

    if task.status == TaskStatus::Failed {
        let exit_code = task.exit_code.filter(|c| *c != 0).unwrap_or(1);
        let log = match crate::io::tail_lines(&task.log_file, opts.log_lines) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::debug!(path = %task.log_file.display(), error = %e, "task log unavailable");
                None
            }
        };
        return Ok(WaitOutcome::Failed {
            task,
            exit_code,
            log,
        });
    }

    let next = registry.get_incomplete_most_recent_per_command(Some(&id));
    if let Some(first) = next.first() {
        registry.remember_task_id(&first.id)?;
        return Ok(WaitOutcome::WaitFor { task, next });
    }

    let failed = registry.get_failed_most_recent_per_command(Some(&id), &[task.command.as_str()]);
    if !failed.is_empty() {
        return Ok(WaitOutcome::ReviewFailures { task, failed });
    }

    let store = registry.store();
    if let Some(advance) = workflow::try_auto_advance(store, launcher, &task)? {
        return Ok(WaitOutcome::Advanced { task, advance });
    }

    match workflow::get_workflow_state(store) {
        Some(state) if !state.is_completed() => Ok(WaitOutcome::NextPrompt {
            task,
            workflow: state.active,
            step: state.step,
        }),
        _ => Ok(WaitOutcome::Done { task }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
