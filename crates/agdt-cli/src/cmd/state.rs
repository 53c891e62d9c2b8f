use crate::background;
use crate::cmd::Ctx;
use crate::output::print_json;
use agdt_core::{
    keypath,
    launcher::BackgroundLauncher,
    state::{ContextChange, PULL_REQUEST_ID},
    AgdtError,
};
use anyhow::Context;
use serde_json::{json, Map, Value};

pub fn set(ctx: &Ctx, key: &str, raw: &str, typed: bool) -> anyhow::Result<()> {
    let value = if typed {
        serde_json::from_str(raw).with_context(|| format!("'{raw}' is not valid JSON"))?
    } else {
        Value::String(raw.to_string())
    };

    let change = ctx
        .store
        .set_context_value(key, value.clone())
        .with_context(|| format!("failed to set '{key}'"))?;

    if change == ContextChange::Switched && key == PULL_REQUEST_ID {
        start_jira_lookup(ctx);
    }

    if ctx.json {
        let change = match change {
            ContextChange::Unchanged => "unchanged",
            ContextChange::Updated => "updated",
            ContextChange::Switched => "switched",
        };
        return print_json(&json!({ "key": key, "value": value, "change": change }));
    }

    let shown = keypath::display_value(&value);
    match change {
        ContextChange::Unchanged => println!("{key} already {shown}"),
        ContextChange::Updated => println!("Set {key} = {shown}"),
        ContextChange::Switched => {
            println!("Switched context: {key} = {shown} (previous state cleared)")
        }
    }
    Ok(())
}

/// Best-effort: a new pull request may name its Jira issue in the branch.
fn start_jira_lookup(ctx: &Ctx) {
    if ctx.dry_run() {
        println!("[dry run] would look up jira.issue_key from the current branch");
        return;
    }
    let started = ctx.launcher().and_then(|l| {
        l.run_function_in_background(
            background::CONTEXT_MODULE,
            background::LOOKUP_JIRA_FUNCTION,
            background::LOOKUP_JIRA_COMMAND,
            Map::new(),
        )
        .map_err(anyhow::Error::from)
    });
    if let Err(e) = started {
        tracing::debug!(error = %e, "jira issue lookup not started");
    }
}

pub fn get(ctx: &Ctx, key: &str) -> anyhow::Result<()> {
    let value = ctx
        .store
        .get(key)
        .ok_or_else(|| AgdtError::KeyNotFound(key.to_string()))?;
    if ctx.json {
        return print_json(&value);
    }
    println!("{}", keypath::display_value(&value));
    Ok(())
}

pub fn delete(ctx: &Ctx, key: &str) -> anyhow::Result<()> {
    let removed = ctx
        .store
        .delete(key)
        .with_context(|| format!("failed to delete '{key}'"))?;
    if ctx.json {
        return print_json(&json!({ "key": key, "deleted": removed }));
    }
    if removed {
        println!("Deleted {key}");
    } else {
        println!("{key} was not set");
    }
    Ok(())
}

pub fn clear(ctx: &Ctx) -> anyhow::Result<()> {
    ctx.store
        .clear_temp_folder(None)
        .context("failed to clear state directory")?;
    if ctx.json {
        return print_json(&json!({ "cleared": ctx.store.dir() }));
    }
    println!("Cleared {}", ctx.store.dir().display());
    Ok(())
}

pub fn show(ctx: &Ctx) -> anyhow::Result<()> {
    print_json(&ctx.store.load())
}
