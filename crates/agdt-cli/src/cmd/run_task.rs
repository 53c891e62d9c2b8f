use crate::background::function_table;
use crate::cmd::{task::TaskExit, Ctx};
use agdt_core::launcher::Bootstrap;
use anyhow::Context;
use std::path::Path;

/// Child side of a background launch. Exits with the task's own code.
pub fn run(ctx: &Ctx, bootstrap: &Path) -> anyhow::Result<()> {
    let code = agdt_core::runner::run_task(&ctx.store, &function_table(), bootstrap)
        .with_context(|| format!("failed to run background task from {}", bootstrap.display()))?;
    if code == 0 {
        return Ok(());
    }
    let task_id = Bootstrap::load(bootstrap)
        .map(|b| b.task_id)
        .unwrap_or_else(|_| bootstrap.display().to_string());
    Err(TaskExit { task_id, code }.into())
}
