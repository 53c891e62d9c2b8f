use crate::background;
use crate::cmd::{task::print_started, Ctx};
use agdt_core::{launcher::BackgroundLauncher, AgdtError};
use anyhow::Context;
use serde_json::{Map, Value};

pub const COMMIT_MESSAGE_KEY: &str = "commit_message";

pub fn save_work(ctx: &Ctx, message: Option<&str>) -> anyhow::Result<()> {
    let message = match message {
        Some(m) => {
            ctx.store
                .set(COMMIT_MESSAGE_KEY, Value::String(m.to_string()))
                .context("failed to stage commit message")?;
            m.to_string()
        }
        None => ctx
            .store
            .get_string(COMMIT_MESSAGE_KEY)
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| AgdtError::KeyNotFound(COMMIT_MESSAGE_KEY.to_string()))
            .context("no commit message: pass --message or run `agdt-set commit_message <message>`")?,
    };

    if ctx.dry_run() {
        println!("[dry run] would run: git add -A && git commit -m {message:?}");
        return Ok(());
    }

    let mut args = Map::new();
    args.insert("message".into(), Value::String(message));
    let task = ctx.launcher()?.run_function_in_background(
        background::GIT_MODULE,
        background::COMMIT_FUNCTION,
        background::SAVE_WORK_COMMAND,
        args,
    )?;
    print_started(ctx, &task)
}
