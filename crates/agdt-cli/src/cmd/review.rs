use crate::cmd::{task::print_started, Ctx};
use crate::output::print_json;
use agdt_core::{
    launcher::BackgroundLauncher,
    review::{self, ReviewOutcome, ReviewQueue},
    state::PULL_REQUEST_ID,
    AgdtError,
};
use anyhow::Context;
use serde_json::{json, Map, Value};

const STAGE_KEY: &str = "file_review";
const FILE_PATH_KEY: &str = "file_review.file_path";
const OUTCOME_KEY: &str = "file_review.outcome";
const SUMMARY_KEY: &str = "file_review.summary";
const SUGGESTIONS_KEY: &str = "file_review.suggestions";

fn pull_request_id(ctx: &Ctx, explicit: Option<&str>) -> anyhow::Result<String> {
    let id = match explicit {
        Some(id) => id.to_string(),
        None => ctx
            .store
            .get_string(PULL_REQUEST_ID)
            .ok_or_else(|| AgdtError::KeyNotFound(PULL_REQUEST_ID.to_string()))
            .context("no pull request: pass --pull-request-id or run `agdt-set pull_request_id <id>`")?,
    };
    review::validate_pr_id(&id)?;
    Ok(id)
}

fn staged(ctx: &Ctx, key: &str) -> anyhow::Result<String> {
    ctx.store
        .get_string(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AgdtError::KeyNotFound(key.to_string()))
        .with_context(|| format!("set it with `agdt-set {key} <value>`"))
}

pub fn add_files(ctx: &Ctx, files: &[String], pr: Option<&str>) -> anyhow::Result<()> {
    let pr = pull_request_id(ctx, pr)?;
    let added = ReviewQueue::update(ctx.store.dir(), &pr, |q| Ok(q.add_files(files.iter().cloned())))
        .context("failed to update review queue")?;
    let status = review::get_queue_status(ctx.store.dir(), &pr);
    if ctx.json {
        return print_json(&json!({ "pull_request_id": pr, "added": added, "status": status }));
    }
    println!(
        "Queued {added} new file(s) for pull request {pr} ({} pending, {} total).",
        status.pending_count, status.total_count
    );
    Ok(())
}

pub fn queue_status(ctx: &Ctx, pr: Option<&str>) -> anyhow::Result<()> {
    let pr = pull_request_id(ctx, pr)?;
    let queue = ReviewQueue::load(ctx.store.dir(), &pr);
    let status = queue.status();
    if ctx.json {
        return print_json(&json!({ "pull_request_id": pr, "status": status, "queue": queue }));
    }
    println!("Pull request {pr}: {}/{} files reviewed", status.completed_count, status.total_count);
    println!(
        "  pending: {}  submitting: {}  failed: {}",
        status.pending_count - status.submission_pending_count - status.failed_count,
        status.submission_pending_count,
        status.failed_count
    );
    for entry in &queue.pending {
        match &entry.error_message {
            Some(msg) => println!("  - {} (failed: {msg})", entry.path),
            None => println!("  - {}", entry.path),
        }
    }
    if status.ready_for_summary() {
        println!("All files reviewed; the summary can be generated.");
    }
    Ok(())
}

pub struct SubmitArgs {
    pub file_path: Option<String>,
    pub outcome: Option<String>,
    pub summary: Option<String>,
    pub suggestions: Option<String>,
    pub pull_request_id: Option<String>,
}

pub fn submit_file(ctx: &Ctx, args: SubmitArgs) -> anyhow::Result<()> {
    for (key, value) in [
        (FILE_PATH_KEY, args.file_path),
        (OUTCOME_KEY, args.outcome),
        (SUMMARY_KEY, args.summary),
        (SUGGESTIONS_KEY, args.suggestions),
    ] {
        if let Some(v) = value {
            ctx.store.set(key, Value::String(v))?;
        }
    }

    let pr = pull_request_id(ctx, args.pull_request_id.as_deref())?;
    let file = staged(ctx, FILE_PATH_KEY)?;
    let outcome: ReviewOutcome = staged(ctx, OUTCOME_KEY)?.parse()?;
    let summary = ctx.store.get_string(SUMMARY_KEY).unwrap_or_default();
    let suggestions = review::parse_suggestions(SUGGESTIONS_KEY, ctx.store.get(SUGGESTIONS_KEY).as_ref())?;

    if ctx.dry_run() {
        println!(
            "[dry run] would submit {outcome} review of {file} on pull request {pr} with {} suggestion(s)",
            suggestions.len()
        );
        return Ok(());
    }

    let mut task_args = Map::new();
    task_args.insert("pull_request_id".into(), Value::String(pr.clone()));
    task_args.insert("file_path".into(), Value::String(file.clone()));
    task_args.insert("outcome".into(), Value::String(outcome.to_string()));
    task_args.insert("summary".into(), Value::String(summary));
    task_args.insert("suggestions".into(), serde_json::to_value(&suggestions)?);

    let task = review::start_submission(&ctx.launcher()?, ctx.store.dir(), &pr, &file, task_args)
        .with_context(|| format!("failed to submit the review of {file}"))?;
    ctx.store.delete(STAGE_KEY)?;
    print_started(ctx, &task)
}

pub fn generate_summary(ctx: &Ctx, pr: Option<&str>) -> anyhow::Result<()> {
    let pr = pull_request_id(ctx, pr)?;
    if ctx.dry_run() {
        println!("[dry run] would generate the review summary for pull request {pr}");
        return Ok(());
    }
    let mut args = Map::new();
    args.insert("pull_request_id".into(), Value::String(pr));
    let task = ctx.launcher()?.run_function_in_background(
        review::SUMMARY_MODULE,
        review::SUMMARY_FUNCTION,
        review::SUMMARY_COMMAND,
        args,
    )?;
    print_started(ctx, &task)
}
