//! Per-pull-request review queue and staged file reviews.
//!
//! The queue lives at `<state_dir>/pull-request-review/prompts/<pr_id>/queue.json`
//! and drives the `pull-request-review` workflow's `file-review → summary`
//! transition. A path is always in exactly one of `pending` / `completed`.

use crate::error::{AgdtError, Result};
use crate::launcher::BackgroundLauncher;
use crate::lock::{self, DEFAULT_LOCK_TIMEOUT};
use crate::paths;
use crate::state::PULL_REQUEST_ID;
use crate::task::BackgroundTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Component, Path, PathBuf};

pub const SUMMARY_MODULE: &str = "agdt.review";
pub const SUMMARY_FUNCTION: &str = "generate_summary";
pub const SUMMARY_COMMAND: &str = "agdt-review-generate-summary";

pub const SUBMIT_MODULE: &str = "agdt.review";
pub const SUBMIT_FUNCTION: &str = "submit_file";
pub const SUBMIT_COMMAND: &str = "agdt-review-submit-file";

// ---------------------------------------------------------------------------
// Queue entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
    #[default]
    Pending,
    SubmissionPending,
    Failed,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub path: String,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(
        rename = "errorMessage",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_message: Option<String>,
}

impl QueueEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            status: EntryStatus::Pending,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub all_complete: bool,
    pub pending_count: usize,
    pub submission_pending_count: usize,
    pub failed_count: usize,
    pub completed_count: usize,
    pub total_count: usize,
}

impl QueueStatus {
    /// Whether `file-review` may move on to `summary`.
    pub fn ready_for_summary(&self) -> bool {
        self.all_complete && self.submission_pending_count == 0 && self.total_count > 0
    }
}

// ---------------------------------------------------------------------------
// ReviewQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueue {
    #[serde(default)]
    pub pending: Vec<QueueEntry>,
    #[serde(default)]
    pub completed: Vec<QueueEntry>,
}

/// A pull request id names one directory under the review root, nothing more.
pub fn validate_pr_id(pr_id: &str) -> Result<()> {
    let mut components = Path::new(pr_id).components();
    let single = matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none();
    if !single || pr_id.contains(['/', '\\']) {
        return Err(AgdtError::InvalidValue {
            key: PULL_REQUEST_ID.into(),
            reason: format!("'{pr_id}' is not a plain pull request id"),
        });
    }
    Ok(())
}

impl ReviewQueue {
    /// Missing or corrupt queue files, and invalid ids, read as an empty queue.
    pub fn load(state_dir: &Path, pr_id: &str) -> Self {
        if let Err(e) = validate_pr_id(pr_id) {
            tracing::warn!(error = %e, "ignoring review queue lookup");
            return Self::default();
        }
        let path = paths::review_queue_path(state_dir, pr_id);
        let data = match crate::io::read_optional(&path) {
            Ok(Some(d)) => d,
            Ok(None) => return Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "review queue unreadable");
                return Self::default();
            }
        };
        serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "review queue is corrupt; treating as empty");
            Self::default()
        })
    }

    pub fn save(&self, state_dir: &Path, pr_id: &str) -> Result<()> {
        validate_pr_id(pr_id)?;
        let path = paths::review_queue_path(state_dir, pr_id);
        let data = serde_json::to_string_pretty(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Locked load-modify-save of the queue for `pr_id`.
    pub fn update<T>(
        state_dir: &Path,
        pr_id: &str,
        f: impl FnOnce(&mut ReviewQueue) -> Result<T>,
    ) -> Result<T> {
        validate_pr_id(pr_id)?;
        let lock_path = paths::lock_path_for(&paths::review_queue_path(state_dir, pr_id));
        lock::with_lock(&lock_path, DEFAULT_LOCK_TIMEOUT, || {
            let mut queue = Self::load(state_dir, pr_id);
            let out = f(&mut queue)?;
            queue.save(state_dir, pr_id)?;
            Ok(out)
        })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.pending.iter().chain(&self.completed).any(|e| e.path == path)
    }

    pub fn pending_entry(&self, path: &str) -> Option<&QueueEntry> {
        self.pending.iter().find(|e| e.path == path)
    }

    /// Queue paths not seen before. Returns how many were added.
    pub fn add_files<I, S>(&mut self, files: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for file in files {
            let file = file.into();
            if !self.contains(&file) {
                self.pending.push(QueueEntry::new(file));
                added += 1;
            }
        }
        added
    }

    fn pending_mut(&mut self, path: &str) -> Result<&mut QueueEntry> {
        self.pending
            .iter_mut()
            .find(|e| e.path == path)
            .ok_or_else(|| AgdtError::NotInQueue(path.to_string()))
    }

    pub fn mark_submission_pending(&mut self, path: &str) -> Result<()> {
        let entry = self.pending_mut(path)?;
        entry.status = EntryStatus::SubmissionPending;
        entry.error_message = None;
        Ok(())
    }

    pub fn fail(&mut self, path: &str, message: impl Into<String>) -> Result<()> {
        let entry = self.pending_mut(path)?;
        entry.status = EntryStatus::Failed;
        entry.error_message = Some(message.into());
        Ok(())
    }

    /// Move `path` from `pending` to `completed`. Completing an already
    /// completed path is a no-op.
    pub fn complete(&mut self, path: &str) -> Result<()> {
        if self.completed.iter().any(|e| e.path == path) {
            return Ok(());
        }
        let idx = self
            .pending
            .iter()
            .position(|e| e.path == path)
            .ok_or_else(|| AgdtError::NotInQueue(path.to_string()))?;
        let mut entry = self.pending.remove(idx);
        entry.status = EntryStatus::Completed;
        entry.error_message = None;
        self.completed.push(entry);
        Ok(())
    }

    pub fn status(&self) -> QueueStatus {
        let count = |s: EntryStatus| self.pending.iter().filter(|e| e.status == s).count();
        QueueStatus {
            all_complete: self.pending.is_empty(),
            pending_count: self.pending.len(),
            submission_pending_count: count(EntryStatus::SubmissionPending),
            failed_count: count(EntryStatus::Failed),
            completed_count: self.completed.len(),
            total_count: self.pending.len() + self.completed.len(),
        }
    }
}

pub fn get_queue_status(state_dir: &Path, pr_id: &str) -> QueueStatus {
    ReviewQueue::load(state_dir, pr_id).status()
}

// ---------------------------------------------------------------------------
// ReviewOutcome / Suggestion / ReviewRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewOutcome {
    Approve,
    Changes,
    Suggest,
}

impl ReviewOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewOutcome::Approve => "Approve",
            ReviewOutcome::Changes => "Changes",
            ReviewOutcome::Suggest => "Suggest",
        }
    }
}

impl fmt::Display for ReviewOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReviewOutcome {
    type Err = AgdtError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(ReviewOutcome::Approve),
            "changes" => Ok(ReviewOutcome::Changes),
            "suggest" => Ok(ReviewOutcome::Suggest),
            _ => Err(AgdtError::InvalidOutcome(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    pub content: String,
}

/// Accepts a JSON array string or an already parsed array; absent/null is empty.
pub fn parse_suggestions(key: &str, value: Option<&Value>) -> Result<Vec<Suggestion>> {
    let invalid = |reason: String| AgdtError::InvalidValue {
        key: key.to_string(),
        reason,
    };
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Vec::new()),
        Some(Value::String(s)) => {
            serde_json::from_str(s).map_err(|e| invalid(format!("not a JSON array of suggestions: {e}")))
        }
        Some(v @ Value::Array(_)) => serde_json::from_value(v.clone())
            .map_err(|e| invalid(format!("malformed suggestion: {e}"))),
        Some(_) => Err(invalid("expected a JSON array".into())),
    }
}

/// The staged review of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub path: String,
    pub outcome: ReviewOutcome,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    pub submitted_at: DateTime<Utc>,
}

/// Persist `record` and move its path to `completed`.
pub fn submit_review(state_dir: &Path, pr_id: &str, record: &ReviewRecord) -> Result<PathBuf> {
    validate_pr_id(pr_id)?;
    let path = paths::review_record_path(state_dir, pr_id, &record.path);
    let data = serde_json::to_string_pretty(record)?;
    crate::io::atomic_write(&path, data.as_bytes())?;
    ReviewQueue::update(state_dir, pr_id, |q| q.complete(&record.path))?;
    tracing::info!(pr_id, file = %record.path, outcome = %record.outcome, "review recorded");
    Ok(path)
}

/// Queue `file` if needed, mark it submission-pending and launch the
/// background submission. A failed launch marks the entry failed so the
/// queue can still reach the summary after a retry.
pub fn start_submission<L: BackgroundLauncher + ?Sized>(
    launcher: &L,
    state_dir: &Path,
    pr_id: &str,
    file: &str,
    args: Map<String, Value>,
) -> Result<BackgroundTask> {
    ReviewQueue::update(state_dir, pr_id, |q| {
        if !q.contains(file) {
            q.add_files([file]);
        }
        if q.pending_entry(file).is_some() {
            q.mark_submission_pending(file)?;
        }
        Ok(())
    })?;

    launcher
        .run_function_in_background(SUBMIT_MODULE, SUBMIT_FUNCTION, SUBMIT_COMMAND, args)
        .inspect_err(|e| {
            if let Err(mark) = record_submission_failure(state_dir, pr_id, file, &e.to_string()) {
                tracing::warn!(file, error = %mark, "could not mark review submission failed");
            }
        })
}

/// Mark `file` as failed in the queue, keeping it pending for a retry.
pub fn record_submission_failure(
    state_dir: &Path,
    pr_id: &str,
    file: &str,
    message: &str,
) -> Result<()> {
    ReviewQueue::update(state_dir, pr_id, |q| q.fail(file, message))
}

fn load_record(state_dir: &Path, pr_id: &str, file: &str) -> Option<ReviewRecord> {
    let path = paths::review_record_path(state_dir, pr_id, file);
    let data = crate::io::read_optional(&path).ok().flatten()?;
    serde_json::from_str(&data).ok()
}

/// Write `summary.md` for the pull request from the queue and the staged reviews.
pub fn generate_summary(state_dir: &Path, pr_id: &str) -> Result<PathBuf> {
    validate_pr_id(pr_id)?;
    let queue = ReviewQueue::load(state_dir, pr_id);
    let status = queue.status();

    let records: Vec<(String, Option<ReviewRecord>)> = queue
        .completed
        .iter()
        .map(|e| (e.path.clone(), load_record(state_dir, pr_id, &e.path)))
        .collect();
    let count = |o: ReviewOutcome| {
        records
            .iter()
            .filter(|(_, r)| r.as_ref().map(|r| r.outcome) == Some(o))
            .count()
    };

    let mut out = format!("# Pull request {pr_id}: review summary\n\n");
    out.push_str(&format!(
        "Reviewed {}/{} files: {} approved, {} with requested changes, {} with suggestions.\n",
        status.completed_count,
        status.total_count,
        count(ReviewOutcome::Approve),
        count(ReviewOutcome::Changes),
        count(ReviewOutcome::Suggest),
    ));

    if !records.is_empty() {
        out.push_str("\n## Files\n\n");
    }
    for (file, record) in &records {
        match record {
            Some(r) => {
                out.push_str(&format!("- `{file}`: {}", r.outcome));
                if !r.summary.is_empty() {
                    out.push_str(&format!(" ({})", r.summary));
                }
                out.push('\n');
                for s in &r.suggestions {
                    let loc = match (s.line, s.end_line) {
                        (Some(a), Some(b)) if b != a => format!("L{a}-{b}: "),
                        (Some(a), _) => format!("L{a}: "),
                        _ => String::new(),
                    };
                    out.push_str(&format!("  - {loc}{}\n", s.content));
                }
            }
            None => out.push_str(&format!("- `{file}`: no review record\n")),
        }
    }

    if !queue.pending.is_empty() {
        out.push_str("\n## Not yet reviewed\n\n");
        for e in &queue.pending {
            match &e.error_message {
                Some(msg) => out.push_str(&format!("- `{}` (failed: {msg})\n", e.path)),
                None => out.push_str(&format!("- `{}`\n", e.path)),
            }
        }
    }

    let path = paths::review_summary_path(state_dir, pr_id);
    crate::io::atomic_write(&path, out.as_bytes())?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
