//! Functions the launcher can run in a detached `agdt __run-task` child.
//!
//! Each one prints progress to stdout (the task log) and returns an error to
//! mark its task failed.

use agdt_core::{
    review::{self, ReviewOutcome, ReviewRecord},
    runner::{FunctionTable, TaskContext},
    state::JIRA_ISSUE_KEY,
    AgdtError,
};
use anyhow::Context;
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;

pub const GIT_MODULE: &str = "agdt.git";
pub const COMMIT_FUNCTION: &str = "commit_cmd";
pub const SAVE_WORK_COMMAND: &str = "agdt-git-save-work";

pub const CONTEXT_MODULE: &str = "agdt.context";
pub const LOOKUP_JIRA_FUNCTION: &str = "lookup_jira_issue_key";
pub const LOOKUP_JIRA_COMMAND: &str = "agdt-lookup-jira-issue";

pub fn function_table() -> FunctionTable {
    FunctionTable::new()
        .register(GIT_MODULE, COMMIT_FUNCTION, commit_cmd)
        .register(review::SUBMIT_MODULE, review::SUBMIT_FUNCTION, submit_file)
        .register(review::SUMMARY_MODULE, review::SUMMARY_FUNCTION, generate_summary)
        .register(CONTEXT_MODULE, LOOKUP_JIRA_FUNCTION, lookup_jira_issue_key)
}

// ---------------------------------------------------------------------------
// git
// ---------------------------------------------------------------------------

fn git_bin() -> anyhow::Result<PathBuf> {
    which::which("git").context("git is not installed or not on PATH")
}

fn git(args: &[&str]) -> anyhow::Result<()> {
    let bin = git_bin()?;
    println!("$ git {}", args.join(" "));
    let status = Command::new(&bin)
        .args(args)
        .status()
        .with_context(|| format!("failed to run git {}", args[0]))?;
    if !status.success() {
        return Err(AgdtError::CommandFailed {
            command: format!("git {}", args[0]),
            code: status.code().unwrap_or(1),
        }
        .into());
    }
    Ok(())
}

fn commit_cmd(ctx: &TaskContext<'_>) -> anyhow::Result<()> {
    let message = ctx.require_arg("message")?;
    git(&["add", "-A"])?;
    git(&["commit", "-m", message])?;
    println!("Committed: {}", message.lines().next().unwrap_or_default());
    Ok(())
}

fn current_branch() -> anyhow::Result<String> {
    let output = Command::new(git_bin()?)
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .context("failed to run git rev-parse")?;
    if !output.status.success() {
        anyhow::bail!("{}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[allow(clippy::expect_used)]
static ISSUE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9]+-[0-9]+)\b").expect("constant regex pattern is valid")
});

/// `feature/DFLY-1234-fix-login` → `DFLY-1234`.
pub fn issue_key_from_branch(branch: &str) -> Option<String> {
    ISSUE_KEY
        .captures(branch)
        .map(|c| c[1].to_ascii_uppercase())
}

/// Fill `jira.issue_key` from the branch name when it is not set yet.
/// Never fails: the lookup only enriches state.
fn lookup_jira_issue_key(ctx: &TaskContext<'_>) -> anyhow::Result<()> {
    if let Some(existing) = ctx.store.get_string(JIRA_ISSUE_KEY) {
        println!("{JIRA_ISSUE_KEY} already set to {existing}");
        return Ok(());
    }
    let branch = match current_branch() {
        Ok(b) => b,
        Err(e) => {
            println!("could not read the current branch: {e:#}");
            return Ok(());
        }
    };
    match issue_key_from_branch(&branch) {
        Some(key) => match ctx.store.set(JIRA_ISSUE_KEY, Value::String(key.clone())) {
            Ok(()) => println!("Found {key} in branch '{branch}'"),
            Err(e) => println!("could not record {key}: {e}"),
        },
        None => println!("No Jira issue key in branch '{branch}'"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// review
// ---------------------------------------------------------------------------

fn submit_file(ctx: &TaskContext<'_>) -> anyhow::Result<()> {
    let pr = ctx.require_arg("pull_request_id")?;
    let file = ctx.require_arg("file_path")?;
    let state_dir = ctx.store.dir();

    let submitted = (|| -> anyhow::Result<PathBuf> {
        let outcome: ReviewOutcome = ctx.require_arg("outcome")?.parse()?;
        let suggestions = review::parse_suggestions("suggestions", ctx.args.get("suggestions"))?;
        let record = ReviewRecord {
            path: file.to_string(),
            outcome,
            summary: ctx.arg_str("summary").unwrap_or_default().to_string(),
            suggestions,
            submitted_at: Utc::now(),
        };
        Ok(review::submit_review(state_dir, pr, &record)?)
    })();

    match submitted {
        Ok(path) => {
            println!("Recorded review of {file} at {}", path.display());
            Ok(())
        }
        Err(e) => {
            if let Err(mark) = review::record_submission_failure(state_dir, pr, file, &format!("{e:#}")) {
                tracing::warn!(file, error = %mark, "could not mark review submission failed");
            }
            Err(e)
        }
    }
}

fn generate_summary(ctx: &TaskContext<'_>) -> anyhow::Result<()> {
    let pr = ctx.require_arg("pull_request_id")?;
    let path = review::generate_summary(ctx.store.dir(), pr)?;
    println!("Wrote review summary to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_key_from_branch_names() {
        assert_eq!(
            issue_key_from_branch("feature/DFLY-1234-fix-login").as_deref(),
            Some("DFLY-1234")
        );
        assert_eq!(
            issue_key_from_branch("bugfix/abc-7").as_deref(),
            Some("ABC-7")
        );
        assert_eq!(issue_key_from_branch("main"), None);
    }

    #[test]
    fn table_has_every_background_function() {
        let table = function_table();
        assert!(table.resolve(GIT_MODULE, COMMIT_FUNCTION).is_some());
        assert!(table
            .resolve(review::SUBMIT_MODULE, review::SUBMIT_FUNCTION)
            .is_some());
        assert!(table
            .resolve(review::SUMMARY_MODULE, review::SUMMARY_FUNCTION)
            .is_some());
        assert!(table.resolve(CONTEXT_MODULE, LOOKUP_JIRA_FUNCTION).is_some());
    }
}
