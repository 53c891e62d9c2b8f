use crate::cmd::Ctx;
use crate::output::{format_secs, print_json, print_table};
use agdt_core::{
    io::tail_lines,
    monitor::{self, WaitOptions, WaitOutcome},
    settings::BackgroundSettings,
    task::{summarize, BackgroundTask},
    AgdtError,
};
use anyhow::Context;
use chrono::{Local, Utc};
use std::time::Duration;

// ---------------------------------------------------------------------------
// TaskExit: a failed background task's exit code, surfaced by `main`
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TaskExit {
    pub task_id: String,
    pub code: i32,
}

impl std::fmt::Display for TaskExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "background task {} failed with exit code {}",
            self.task_id, self.code
        )
    }
}

impl std::error::Error for TaskExit {}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn resolve_task(ctx: &Ctx, task_id: Option<&str>) -> anyhow::Result<BackgroundTask> {
    let registry = ctx.registry();
    let id = task_id
        .map(str::to_string)
        .or_else(|| registry.current_task_id())
        .ok_or(AgdtError::NoTaskId)?;
    Ok(registry
        .get_task_by_id(&id)
        .ok_or(AgdtError::TaskNotFound(id))?)
}

fn started_at(task: &BackgroundTask) -> String {
    task.start_time
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn duration(task: &BackgroundTask) -> String {
    let secs = task
        .duration_secs()
        .unwrap_or_else(|| task.elapsed_secs(Utc::now()));
    format_secs(secs)
}

/// Report a freshly launched task.
pub fn print_started(ctx: &Ctx, task: &BackgroundTask) -> anyhow::Result<()> {
    if ctx.json {
        return print_json(task);
    }
    println!(
        "Started {} in the background (task {}).",
        task.command, task.id
    );
    println!("Log: {}", task.log_file.display());
    println!("Run `agdt-task-wait` to follow it.");
    Ok(())
}

fn seconds(value: f64, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow::anyhow!("{flag} must be a non-negative number of seconds, got {value}"))
}

// ---------------------------------------------------------------------------
// tasks / task-status / task-log / tasks-clean
// ---------------------------------------------------------------------------

pub fn list(ctx: &Ctx) -> anyhow::Result<()> {
    let tasks = ctx.registry().get_background_tasks();
    if ctx.json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("No background tasks.");
        return Ok(());
    }
    let rows = tasks
        .iter()
        .map(|t| {
            vec![
                t.id.clone(),
                t.command.clone(),
                t.status.to_string(),
                started_at(t),
                duration(t),
            ]
        })
        .collect();
    print_table(&["ID", "COMMAND", "STATUS", "STARTED", "DURATION"], rows);
    println!("\n{}", summarize(&tasks));
    Ok(())
}

pub fn status(ctx: &Ctx, task_id: Option<&str>) -> anyhow::Result<()> {
    let task = resolve_task(ctx, task_id)?;
    if ctx.json {
        return print_json(&task);
    }
    println!("Task:     {}", task.id);
    println!("Command:  {}", task.command);
    println!("Status:   {}", task.status);
    println!("Started:  {}", started_at(&task));
    println!("Duration: {}", duration(&task));
    if let Some(code) = task.exit_code {
        println!("Exit:     {code}");
    }
    if let Some(msg) = &task.error_message {
        println!("Error:    {msg}");
    }
    println!("Log:      {}", task.log_file.display());
    Ok(())
}

pub fn log(ctx: &Ctx, task_id: Option<&str>, lines: Option<usize>) -> anyhow::Result<()> {
    let task = resolve_task(ctx, task_id)?;
    let text = tail_lines(&task.log_file, lines.unwrap_or(0))
        .with_context(|| format!("no log for task {} at {}", task.id, task.log_file.display()))?;
    if ctx.json {
        return print_json(&serde_json::json!({ "task_id": task.id, "log": text }));
    }
    print!("{text}");
    if !text.ends_with('\n') && !text.is_empty() {
        println!();
    }
    Ok(())
}

pub fn clean(ctx: &Ctx, expiry_hours: Option<f64>) -> anyhow::Result<()> {
    let hours = match expiry_hours {
        Some(h) if !h.is_finite() || h < 0.0 => {
            anyhow::bail!("--expiry-hours must be a non-negative number, got {h}")
        }
        Some(h) => h,
        None => BackgroundSettings::from_store(&ctx.store).expiry_hours,
    };
    let registry = ctx.registry();
    let tasks = registry
        .cleanup_expired_tasks(hours)
        .context("failed to remove expired tasks")?;
    let logs = registry
        .cleanup_old_logs(hours)
        .context("failed to remove orphaned task logs")?;
    if ctx.json {
        return print_json(&serde_json::json!({
            "expiry_hours": hours,
            "removed_tasks": tasks,
            "removed_logs": logs,
        }));
    }
    println!("Removed {tasks} expired task(s) and {logs} orphaned log file(s) older than {hours}h.");
    Ok(())
}

// ---------------------------------------------------------------------------
// task-wait
// ---------------------------------------------------------------------------

pub struct WaitArgs {
    pub task_id: Option<String>,
    pub wait_interval: Option<f64>,
    pub timeout: Option<f64>,
    pub log_lines: Option<usize>,
}

pub fn wait(ctx: &Ctx, args: WaitArgs) -> anyhow::Result<()> {
    let settings = BackgroundSettings::from_store(&ctx.store);
    let mut opts = WaitOptions::from_settings(args.task_id, &settings);
    if let Some(s) = args.wait_interval {
        opts.wait_interval = seconds(s, "--wait-interval")?;
    }
    if let Some(s) = args.timeout {
        opts.timeout = seconds(s, "--timeout")?;
    }
    if let Some(n) = args.log_lines {
        opts.log_lines = n;
    }

    let launcher = ctx.launcher()?;
    let outcome = monitor::wait(&ctx.registry(), &launcher, &opts)?;

    if ctx.json {
        print_json(&outcome)?;
    } else {
        print_outcome(&outcome, &opts);
    }

    match outcome {
        WaitOutcome::Failed {
            task, exit_code, ..
        } => Err(TaskExit {
            task_id: task.id,
            code: exit_code,
        }
        .into()),
        _ => Ok(()),
    }
}

fn print_outcome(outcome: &WaitOutcome, opts: &WaitOptions) {
    let task = outcome.task();
    let name = format!("{} ({})", task.command, task.id);
    match outcome {
        WaitOutcome::TimedOut { elapsed_secs, .. } => {
            println!(
                "Task {name} is still running after {} (timeout {}).",
                format_secs(*elapsed_secs),
                format_secs(opts.timeout.as_secs_f64())
            );
            println!("It keeps running in the background. Next steps:");
            println!("  - inspect its output: agdt-task-log --task-id {}", task.id);
            println!("  - or raise the limit: agdt-set background.timeout <seconds>, then agdt-task-wait");
        }
        WaitOutcome::StillRunning { .. } => {
            println!("Task {name} is still running.");
            println!("Run `agdt-task-wait` again to keep waiting.");
        }
        WaitOutcome::Failed {
            exit_code, log, ..
        } => {
            println!("Task {name} failed with exit code {exit_code}.");
            if let Some(msg) = &task.error_message {
                println!("Error: {msg}");
            }
            match log {
                Some(text) if !text.trim().is_empty() => {
                    println!("--- log: {} ---", task.log_file.display());
                    println!("{}", text.trim_end());
                    println!("--- end of log ---");
                }
                _ => println!("(no log output at {})", task.log_file.display()),
            }
            println!("Fix the problem shown above, then re-run `{}`.", task.command);
        }
        WaitOutcome::WaitFor { next, .. } => {
            println!("Task {name} completed.");
            println!("Other background work is still in flight:");
            for t in next {
                println!("  - {} ({}): {}", t.command, t.id, t.status);
            }
            if let Some(first) = next.first() {
                println!("Now following {}; run `agdt-task-wait` again.", first.id);
            }
        }
        WaitOutcome::ReviewFailures { failed, .. } => {
            println!("Task {name} completed, but these commands failed on their last run:");
            for t in failed {
                println!("  - {} ({}): exit code {}", t.command, t.id, t.exit_code.unwrap_or(1));
            }
            println!("Review them with `agdt-task-log --task-id <id>` and re-run the failed command.");
        }
        WaitOutcome::Advanced { advance, .. } => {
            println!("Task {name} completed.");
            println!(
                "Workflow {} moved from {} to {}.",
                advance.workflow, advance.from_step, advance.to_step
            );
            match &advance.triggered {
                Some(t) => println!(
                    "Started {} ({}); run `agdt-task-wait` to follow it.",
                    t.command, t.id
                ),
                None => println!("Run `agdt-get-next-workflow-prompt` for the next instructions."),
            }
        }
        WaitOutcome::NextPrompt { workflow, step, .. } => {
            println!("Task {name} completed.");
            println!("Run `agdt-get-next-workflow-prompt` to continue {workflow} (step {step}).");
        }
        WaitOutcome::Done { .. } => {
            println!("Task {name} completed.");
        }
    }
}
