//! Child side of the launcher contract.
//!
//! `agdt __run-task <bootstrap>` lands here: the bootstrap names a function in
//! the [`FunctionTable`], the runner calls it and writes the terminal status
//! back into the task record before the process exits.

use crate::error::{AgdtError, Result};
use crate::launcher::Bootstrap;
use crate::registry::TaskRegistry;
use crate::state::StateStore;
use crate::task::BackgroundTask;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;

/// Exit code recorded when the bootstrap names an unregistered function.
pub const EXIT_UNKNOWN_FUNCTION: i32 = 127;
/// Exit code recorded when a task function panics.
pub const EXIT_PANICKED: i32 = 101;

/// Everything a background function gets to work with.
pub struct TaskContext<'a> {
    pub store: &'a StateStore,
    pub task: &'a BackgroundTask,
    pub args: &'a Map<String, Value>,
}

impl TaskContext<'_> {
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }

    pub fn require_arg(&self, name: &str) -> Result<&str> {
        self.arg_str(name)
            .ok_or_else(|| AgdtError::KeyNotFound(format!("args.{name}")))
    }
}

pub type TaskFn = fn(&TaskContext<'_>) -> anyhow::Result<()>;

/// Registered background functions, keyed by `module_path.function_name`.
#[derive(Default, Clone)]
pub struct FunctionTable {
    entries: BTreeMap<String, TaskFn>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, module_path: &str, function_name: &str, f: TaskFn) -> Self {
        self.entries
            .insert(format!("{module_path}.{function_name}"), f);
        self
    }

    pub fn resolve(&self, module_path: &str, function_name: &str) -> Option<TaskFn> {
        self.entries
            .get(&format!("{module_path}.{function_name}"))
            .copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Run the task described by `bootstrap_path` and record its outcome.
/// Returns the exit code the child process should exit with.
pub fn run_task(store: &StateStore, table: &FunctionTable, bootstrap_path: &Path) -> Result<i32> {
    let bootstrap = Bootstrap::load(bootstrap_path)?;
    let registry = TaskRegistry::new(store.clone());
    let id = bootstrap.task_id.as_str();

    let task = match registry.mark_running(id) {
        Ok(t) => t,
        Err(e) => {
            // The record can vanish when a context switch wipes the state
            // directory; the work still runs.
            tracing::warn!(task_id = id, error = %e, "task record unavailable; running untracked");
            let mut t = BackgroundTask::new(id, &bootstrap.command, &bootstrap.log_file);
            t.module_path = bootstrap.module_path.clone();
            t.function_name = bootstrap.function_name.clone();
            t
        }
    };

    tracing::info!(
        task_id = id,
        command = %bootstrap.command,
        module_path = %bootstrap.module_path,
        function_name = %bootstrap.function_name,
        "task started"
    );

    let Some(f) = table.resolve(&bootstrap.module_path, &bootstrap.function_name) else {
        let err = AgdtError::UnknownFunction {
            module_path: bootstrap.module_path.clone(),
            function_name: bootstrap.function_name.clone(),
        };
        tracing::error!(task_id = id, "{err}");
        record(&registry, id, Err((EXIT_UNKNOWN_FUNCTION, err.to_string())));
        return Ok(EXIT_UNKNOWN_FUNCTION);
    };

    let ctx = TaskContext {
        store,
        task: &task,
        args: &bootstrap.args,
    };
    let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| f(&ctx))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err((exit_code_for(&e), format!("{e:#}"))),
        Err(_) => Err((EXIT_PANICKED, "background function panicked".to_string())),
    };

    let code = match &outcome {
        Ok(()) => {
            tracing::info!(task_id = id, "task completed");
            0
        }
        Err((code, message)) => {
            tracing::error!(task_id = id, exit_code = code, "task failed: {message}");
            *code
        }
    };
    record(&registry, id, outcome);
    Ok(code)
}

fn record(registry: &TaskRegistry, id: &str, outcome: std::result::Result<(), (i32, String)>) {
    let result = match outcome {
        Ok(()) => registry.mark_completed(id),
        Err((code, message)) => registry.mark_failed(id, code, message),
    };
    if let Err(e) = result {
        tracing::warn!(task_id = id, error = %e, "could not record task outcome");
    }
}

/// The exit code carried by a failed external command, else 1.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<AgdtError>() {
        Some(AgdtError::CommandFailed { code, .. }) if *code != 0 => *code,
        _ => 1,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths;
    use crate::task::TaskStatus;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn ok_fn(ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        let msg = ctx.require_arg("message")?;
        ctx.store.set("ran_with", json!(msg))?;
        Ok(())
    }

    fn failing_fn(_: &TaskContext<'_>) -> anyhow::Result<()> {
        Err(AgdtError::CommandFailed {
            command: "git commit".into(),
            code: 3,
        }
        .into())
    }

    fn panicking_fn(_: &TaskContext<'_>) -> anyhow::Result<()> {
        panic!("boom")
    }

    fn table() -> FunctionTable {
        FunctionTable::new()
            .register("agdt.test", "ok", ok_fn)
            .register("agdt.test", "fail", failing_fn)
            .register("agdt.test", "panic", panicking_fn)
    }

    fn prepare(store: &StateStore, function_name: &str, args: Map<String, Value>) -> PathBuf {
        let registry = TaskRegistry::new(store.clone());
        let id = format!("task-{function_name}");
        let log = paths::task_log_path(store.dir(), &id);
        registry
            .add_task(&BackgroundTask::new(&id, "agdt-test", &log))
            .unwrap();
        let bootstrap = Bootstrap {
            module_path: "agdt.test".into(),
            function_name: function_name.into(),
            task_id: id.clone(),
            command: "agdt-test".into(),
            log_file: log,
            args,
        };
        let path = paths::task_bootstrap_path(store.dir(), &id);
        crate::io::atomic_write(&path, bootstrap.render().unwrap().as_bytes()).unwrap();
        path
    }

    #[test]
    fn successful_function_self_reports_completion() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let mut args = Map::new();
        args.insert("message".into(), json!("hello"));
        let path = prepare(&store, "ok", args);

        assert_eq!(run_task(&store, &table(), &path).unwrap(), 0);
        let task = TaskRegistry::new(store.clone()).get_task_by_id("task-ok").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.exit_code, Some(0));
        assert_eq!(store.get("ran_with"), Some(json!("hello")));
    }

    #[test]
    fn failed_command_propagates_exit_code() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let path = prepare(&store, "fail", Map::new());

        assert_eq!(run_task(&store, &table(), &path).unwrap(), 3);
        let task = TaskRegistry::new(store).get_task_by_id("task-fail").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, Some(3));
        assert!(task.error_message.unwrap().contains("git commit"));
    }

    #[test]
    fn missing_argument_fails_with_code_one() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let path = prepare(&store, "ok", Map::new());
        assert_eq!(run_task(&store, &table(), &path).unwrap(), 1);
    }

    #[test]
    fn panic_is_recorded_as_failure() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let path = prepare(&store, "panic", Map::new());
        assert_eq!(run_task(&store, &table(), &path).unwrap(), EXIT_PANICKED);
        let task = TaskRegistry::new(store).get_task_by_id("task-panic").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[test]
    fn unknown_function_fails_with_127() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let path = prepare(&store, "missing", Map::new());
        assert_eq!(
            run_task(&store, &table(), &path).unwrap(),
            EXIT_UNKNOWN_FUNCTION
        );
    }

    #[test]
    fn table_lists_registered_names() {
        let table = table();
        let names: Vec<&str> = table.names().collect();
        assert_eq!(names, vec!["agdt.test.fail", "agdt.test.ok", "agdt.test.panic"]);
    }
}
