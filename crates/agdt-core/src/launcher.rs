//! Detached background execution.
//!
//! The launcher writes a bootstrap file, registers a `pending` task record
//! and spawns `<agdt> __run-task <bootstrap>` in its own process group with
//! stdout/stderr appended to the task log. It never waits for the child:
//! the child reports its own terminal status through the state store
//! (see [`crate::runner`]).
//!
//! # Bootstrap format
//!
//! A TOML document whose first two keys are always written as literal
//! strings so they stay greppable:
//!
//! ```text
//! module_path = 'agdt.git'
//! function_name = 'commit_cmd'
//! task_id = "…"
//! command = "agdt-git-save-work"
//! log_file = "…/background-tasks/<id>.log"
//! args = '{"message":"…"}'
//! ```

use crate::error::{AgdtError, Result};
use crate::paths;
use crate::registry::TaskRegistry;
use crate::settings::STATE_DIR_ENV;
use crate::state::StateStore;
use crate::task::BackgroundTask;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use uuid::Uuid;

/// Hidden CLI subcommand the child is started with.
pub const RUN_TASK_SUBCOMMAND: &str = "__run-task";

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Bootstrap {
    pub module_path: String,
    pub function_name: String,
    pub task_id: String,
    pub command: String,
    pub log_file: PathBuf,
    pub args: Map<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct BootstrapBody {
    task_id: String,
    command: String,
    log_file: String,
    args: String,
}

#[derive(Deserialize)]
struct BootstrapFile {
    module_path: String,
    function_name: String,
    #[serde(flatten)]
    body: BootstrapBody,
}

#[allow(clippy::expect_used)]
static IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("constant regex pattern is valid")
});

pub fn validate_function_ref(name: &str) -> Result<()> {
    if name.len() > 128 || !IDENT.is_match(name) {
        return Err(AgdtError::InvalidFunctionRef(name.to_string()));
    }
    Ok(())
}

impl Bootstrap {
    pub fn render(&self) -> Result<String> {
        validate_function_ref(&self.module_path)?;
        validate_function_ref(&self.function_name)?;
        let body = toml::to_string(&BootstrapBody {
            task_id: self.task_id.clone(),
            command: self.command.clone(),
            log_file: self.log_file.to_string_lossy().into_owned(),
            args: serde_json::to_string(&self.args)?,
        })?;
        Ok(format!(
            "# agdt background task bootstrap\nmodule_path = '{}'\nfunction_name = '{}'\n{body}",
            self.module_path, self.function_name
        ))
    }

    pub fn parse(data: &str) -> Result<Self> {
        let file: BootstrapFile = toml::from_str(data)?;
        validate_function_ref(&file.module_path)?;
        validate_function_ref(&file.function_name)?;
        let args = match serde_json::from_str::<Value>(&file.body.args)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(AgdtError::InvalidValue {
                    key: "args".into(),
                    reason: "bootstrap args must be a JSON object".into(),
                })
            }
        };
        Ok(Self {
            module_path: file.module_path,
            function_name: file.function_name,
            task_id: file.body.task_id,
            command: file.body.command,
            log_file: PathBuf::from(file.body.log_file),
            args,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }
}

// ---------------------------------------------------------------------------
// BackgroundLauncher
// ---------------------------------------------------------------------------

/// Anything that can start a function in the background and hand back its record.
pub trait BackgroundLauncher {
    fn run_function_in_background(
        &self,
        module_path: &str,
        function_name: &str,
        command_display_name: &str,
        args: Map<String, Value>,
    ) -> Result<BackgroundTask>;
}

/// Spawns detached `agdt` child processes.
#[derive(Debug, Clone)]
pub struct TaskLauncher {
    registry: TaskRegistry,
    program: PathBuf,
}

impl TaskLauncher {
    pub fn new(store: StateStore, program: impl Into<PathBuf>) -> Self {
        Self {
            registry: TaskRegistry::new(store),
            program: program.into(),
        }
    }

    /// Launcher that re-executes the running binary.
    pub fn for_current_exe(store: StateStore) -> Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(store, exe))
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    fn spawn(&self, bootstrap_path: &Path, log_file: &Path) -> Result<()> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&self.program);
        cmd.arg(RUN_TASK_SUBCOMMAND)
            .arg(bootstrap_path)
            .env(STATE_DIR_ENV, self.registry.store().dir())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        detach(&mut cmd);

        let child = cmd.spawn()?;
        tracing::debug!(pid = child.id(), program = %self.program.display(), "spawned background child");
        Ok(())
    }
}

impl BackgroundLauncher for TaskLauncher {
    fn run_function_in_background(
        &self,
        module_path: &str,
        function_name: &str,
        command_display_name: &str,
        args: Map<String, Value>,
    ) -> Result<BackgroundTask> {
        validate_function_ref(module_path)?;
        validate_function_ref(function_name)?;

        let state_dir = self.registry.store().dir().to_path_buf();
        let id = Uuid::new_v4().to_string();
        let log_file = paths::task_log_path(&state_dir, &id);
        let bootstrap_path = paths::task_bootstrap_path(&state_dir, &id);
        crate::io::ensure_dir(&paths::tasks_dir(&state_dir))?;

        let bootstrap = Bootstrap {
            module_path: module_path.to_string(),
            function_name: function_name.to_string(),
            task_id: id.clone(),
            command: command_display_name.to_string(),
            log_file: log_file.clone(),
            args,
        };
        crate::io::atomic_write(&bootstrap_path, bootstrap.render()?.as_bytes())?;

        let mut task = BackgroundTask::new(&id, command_display_name, &log_file);
        task.module_path = module_path.to_string();
        task.function_name = function_name.to_string();
        self.registry.add_task(&task)?;

        if let Err(e) = self.spawn(&bootstrap_path, &log_file) {
            let message = format!("failed to start '{}': {e}", self.program.display());
            tracing::error!(task_id = %id, error = %e, "background spawn failed");
            if let Err(mark_err) = self.registry.mark_failed(&id, 1, message.clone()) {
                tracing::warn!(task_id = %id, error = %mark_err, "could not record spawn failure");
            }
            return Err(AgdtError::SpawnFailed(message));
        }

        tracing::info!(task_id = %id, command = command_display_name, module_path, function_name, "background task started");
        Ok(task)
    }
}

/// Put the child in its own process group / console so it outlives the CLI.
fn detach(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }
}

/// In-process launcher for tests: registers the task, spawns nothing.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    pub(crate) struct RecordingLauncher {
        registry: TaskRegistry,
        launched: RefCell<Vec<String>>,
    }

    impl RecordingLauncher {
        pub(crate) fn new(store: StateStore) -> Self {
            Self {
                registry: TaskRegistry::new(store),
                launched: RefCell::new(Vec::new()),
            }
        }

        pub(crate) fn launched(&self) -> Vec<String> {
            self.launched.borrow().clone()
        }
    }

    impl BackgroundLauncher for RecordingLauncher {
        fn run_function_in_background(
            &self,
            module_path: &str,
            function_name: &str,
            command_display_name: &str,
            _args: Map<String, Value>,
        ) -> Result<BackgroundTask> {
            let id = Uuid::new_v4().to_string();
            let log = paths::task_log_path(self.registry.store().dir(), &id);
            let mut task = BackgroundTask::new(&id, command_display_name, log);
            task.module_path = module_path.to_string();
            task.function_name = function_name.to_string();
            self.registry.add_task(&task)?;
            self.launched
                .borrow_mut()
                .push(format!("{module_path}.{function_name}"));
            Ok(task)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
