pub mod git;
pub mod review;
pub mod run_task;
pub mod state;
pub mod task;
pub mod workflow;

use agdt_core::{
    launcher::TaskLauncher,
    prompts::PromptRenderer,
    registry::TaskRegistry,
    settings::{self, PROMPTS_DIR_ENV},
    state::StateStore,
};
use anyhow::Context;
use std::path::{Path, PathBuf};

/// What every command needs: the resolved state store plus global flags.
pub struct Ctx {
    pub store: StateStore,
    pub repo_root: PathBuf,
    pub json: bool,
    dry_run_flag: bool,
}

impl Ctx {
    pub fn new(repo_root: &Path, state_dir: Option<&Path>, json: bool, dry_run: bool) -> Self {
        Self {
            store: StateStore::new(settings::resolve_state_dir(state_dir, repo_root)),
            repo_root: repo_root.to_path_buf(),
            json,
            dry_run_flag: dry_run,
        }
    }

    /// `--dry-run`, or a truthy `dry_run` in state.
    pub fn dry_run(&self) -> bool {
        self.dry_run_flag || self.store.is_dry_run()
    }

    pub fn registry(&self) -> TaskRegistry {
        TaskRegistry::new(self.store.clone())
    }

    pub fn launcher(&self) -> anyhow::Result<TaskLauncher> {
        TaskLauncher::for_current_exe(self.store.clone())
            .context("failed to locate the agdt executable")
    }

    pub fn renderer(&self) -> PromptRenderer {
        let explicit = std::env::var_os(PROMPTS_DIR_ENV).map(PathBuf::from);
        let dir = settings::resolve_prompts_dir(explicit.as_deref(), &self.repo_root);
        PromptRenderer::new(Some(dir), self.store.dir())
    }
}
