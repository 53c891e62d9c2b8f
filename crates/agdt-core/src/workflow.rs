//! The single active workflow and its step transitions.
//!
//! Workflow state lives under the `workflow` key of the state document. At
//! most one workflow is active; initiating a different one replaces it.

use crate::error::{AgdtError, Result};
use crate::keypath;
use crate::launcher::BackgroundLauncher;
use crate::prompts::{PromptRenderer, RenderedPrompt};
use crate::review;
use crate::state::{StateStore, PULL_REQUEST_ID};
use crate::task::BackgroundTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const WORKFLOW_KEY: &str = "workflow";

pub const INITIATE_STEP: &str = "initiate";
pub const COMPLETION_STEP: &str = "completion";
pub const FILE_REVIEW_STEP: &str = "file-review";
pub const SUMMARY_STEP: &str = "summary";

pub const PULL_REQUEST_REVIEW: &str = "pull-request-review";

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A named workflow: ordered steps, the state it needs, and where to go
/// when the recorded step is not one of its own.
#[derive(Debug, PartialEq, Eq)]
pub struct WorkflowDef {
    pub name: &'static str,
    pub steps: &'static [&'static str],
    pub required_keys: &'static [&'static str],
    pub optional_keys: &'static [&'static str],
    pub fallback_step: &'static str,
}

impl WorkflowDef {
    pub fn has_step(&self, step: &str) -> bool {
        self.steps.contains(&step)
    }

    /// The step after `current` ignoring any conditional branch.
    pub fn linear_next(&self, current: &str) -> &'static str {
        match self.steps.iter().position(|s| *s == current) {
            Some(i) => self.steps[(i + 1).min(self.steps.len() - 1)],
            None => self.fallback_step,
        }
    }
}

pub static WORKFLOWS: &[WorkflowDef] = &[
    WorkflowDef {
        name: "work-on-jira-issue",
        steps: &[
            "initiate",
            "setup",
            "retrieve",
            "planning",
            "checklist-creation",
            "implementation",
            "implementation-review",
            "verification",
            "commit",
            "pull-request",
            "completion",
        ],
        required_keys: &["jira.issue_key"],
        optional_keys: &["jira.summary", "pull_request_id"],
        fallback_step: "planning",
    },
    WorkflowDef {
        name: PULL_REQUEST_REVIEW,
        steps: &["initiate", "file-review", "summary", "completion"],
        required_keys: &["pull_request_id"],
        optional_keys: &["jira.issue_key"],
        fallback_step: "file-review",
    },
    WorkflowDef {
        name: "create-jira-issue",
        steps: &["initiate", "drafting", "creation", "completion"],
        required_keys: &["jira.project_key"],
        optional_keys: &["jira.summary", "jira.description"],
        fallback_step: "drafting",
    },
    WorkflowDef {
        name: "create-jira-epic",
        steps: &["initiate", "drafting", "creation", "completion"],
        required_keys: &["jira.project_key"],
        optional_keys: &["jira.summary", "jira.description"],
        fallback_step: "drafting",
    },
    WorkflowDef {
        name: "create-jira-subtask",
        steps: &["initiate", "drafting", "creation", "completion"],
        required_keys: &["jira.parent_key"],
        optional_keys: &["jira.project_key", "jira.summary"],
        fallback_step: "drafting",
    },
    WorkflowDef {
        name: "update-jira-issue",
        steps: &["initiate", "retrieve", "update", "completion"],
        required_keys: &["jira.issue_key"],
        optional_keys: &["jira.summary"],
        fallback_step: "retrieve",
    },
    WorkflowDef {
        name: "apply-pull-request-review-suggestions",
        steps: &["initiate", "retrieve", "apply-suggestions", "commit", "completion"],
        required_keys: &["pull_request_id"],
        optional_keys: &["jira.issue_key"],
        fallback_step: "apply-suggestions",
    },
];

pub fn definition(name: &str) -> Result<&'static WorkflowDef> {
    WORKFLOWS
        .iter()
        .find(|d| d.name == name)
        .ok_or_else(|| AgdtError::UnknownWorkflow(name.to_string()))
}

// ---------------------------------------------------------------------------
// WorkflowStatus / WorkflowState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStatus {
    Initiated,
    InProgress,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Initiated => "initiated",
            WorkflowStatus::InProgress => "in-progress",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = AgdtError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(WorkflowStatus::Initiated),
            "in-progress" | "in_progress" => Ok(WorkflowStatus::InProgress),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            _ => Err(AgdtError::InvalidValue {
                key: "status".into(),
                reason: format!("'{s}' is not one of initiated, in-progress, completed, failed"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Name of the running workflow.
    pub active: String,
    pub status: WorkflowStatus,
    pub step: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl WorkflowState {
    pub fn is_completed(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

fn state_in(doc: &Value) -> Option<WorkflowState> {
    let raw = keypath::get(doc, WORKFLOW_KEY)?;
    match serde_json::from_value(raw.clone()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed workflow state");
            None
        }
    }
}

pub fn get_workflow_state(store: &StateStore) -> Option<WorkflowState> {
    state_in(&store.load())
}

/// Whether a workflow is running; with `name`, whether that one is.
pub fn is_workflow_active(store: &StateStore, name: Option<&str>) -> bool {
    match (get_workflow_state(store), name) {
        (Some(s), Some(n)) => s.active == n,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Write the workflow record.
///
/// For the workflow already recorded, `context` is merged into the existing
/// context (a `null` value removes the key) and `started_at` is kept. A
/// different name starts a fresh record.
pub fn set_workflow_state(
    store: &StateStore,
    name: &str,
    status: WorkflowStatus,
    step: &str,
    context: Option<&Map<String, Value>>,
) -> Result<WorkflowState> {
    store.update(|doc| {
        let (started_at, mut merged) = match state_in(doc) {
            Some(prev) if prev.active == name => (prev.started_at, prev.context),
            _ => (Utc::now(), Map::new()),
        };
        for (k, v) in context.into_iter().flatten() {
            if v.is_null() {
                merged.remove(k);
            } else {
                merged.insert(k.clone(), v.clone());
            }
        }
        let state = WorkflowState {
            active: name.to_string(),
            status,
            step: step.to_string(),
            started_at,
            context: merged,
        };
        keypath::set(doc, WORKFLOW_KEY, serde_json::to_value(&state)?);
        Ok(state)
    })
}

pub fn clear_workflow(store: &StateStore) -> Result<bool> {
    store.delete(WORKFLOW_KEY)
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Next step from `current`. `pull-request-review` only leaves `file-review`
/// once the review queue is ready for a summary.
pub fn next_step(def: &WorkflowDef, current: &str, queue_ready: bool) -> &'static str {
    if def.name == PULL_REQUEST_REVIEW && current == FILE_REVIEW_STEP {
        return if queue_ready { SUMMARY_STEP } else { FILE_REVIEW_STEP };
    }
    def.linear_next(current)
}

fn pull_request_id(store: &StateStore, state: &WorkflowState) -> Option<String> {
    store.get_string(PULL_REQUEST_ID).or_else(|| {
        state
            .context
            .get(PULL_REQUEST_ID)
            .filter(|v| !v.is_null())
            .map(keypath::display_value)
    })
}

fn queue_ready(store: &StateStore, state: &WorkflowState) -> bool {
    pull_request_id(store, state)
        .map(|pr| review::get_queue_status(store.dir(), &pr).ready_for_summary())
        .unwrap_or(false)
}

/// Next step for the recorded workflow, consulting the review queue where needed.
pub fn resolve_next_step(store: &StateStore, state: &WorkflowState) -> Result<&'static str> {
    let def = definition(&state.active)?;
    let ready = def.name == PULL_REQUEST_REVIEW && queue_ready(store, state);
    Ok(next_step(def, &state.step, ready))
}

fn present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Template variables from state: each key with dots turned into underscores.
fn collect_variables<'a>(doc: &Value, keys: impl IntoIterator<Item = &'a str>) -> Map<String, Value> {
    let mut vars = Map::new();
    for key in keys {
        if let Some(v) = keypath::get(doc, key).filter(|v| !v.is_null()) {
            vars.insert(key.replace('.', "_"), v.clone());
        }
    }
    vars
}

fn workflow_keys<'a>(def: &'a WorkflowDef, extra: &'a [String]) -> impl Iterator<Item = &'a str> {
    def.required_keys
        .iter()
        .chain(def.optional_keys)
        .copied()
        .chain(extra.iter().map(String::as_str))
}

/// Start `name` at `step` (default `initiate`).
///
/// Every required key (the workflow's own plus `required`) must be set in
/// state. Any previously active workflow is discarded.
pub fn initiate_workflow(
    store: &StateStore,
    renderer: &PromptRenderer,
    name: &str,
    required: &[String],
    optional: &[String],
    step: Option<&str>,
) -> Result<(WorkflowState, RenderedPrompt)> {
    let def = definition(name)?;
    let step = step.unwrap_or(INITIATE_STEP);
    if !def.has_step(step) {
        return Err(AgdtError::UnknownStep {
            workflow: name.to_string(),
            step: step.to_string(),
        });
    }

    let doc = store.load();
    let mut missing: Vec<String> = Vec::new();
    for key in def.required_keys.iter().copied().chain(required.iter().map(String::as_str)) {
        if !present(keypath::get(&doc, key)) && !missing.iter().any(|m| m == key) {
            missing.push(key.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(AgdtError::MissingStateKeys {
            workflow: name.to_string(),
            keys: missing,
        });
    }

    let extra: Vec<String> = required.iter().chain(optional).cloned().collect();
    let vars = collect_variables(&doc, workflow_keys(def, &extra));

    if let Some(prev) = state_in(&doc) {
        if prev.active != name {
            tracing::warn!(previous = %prev.active, next = name, "replacing active workflow");
        }
    }
    clear_workflow(store)?;
    let state = set_workflow_state(store, name, WorkflowStatus::Initiated, step, Some(&vars))?;
    let prompt = renderer.render(name, step, &prompt_variables(store, def, &state))?;
    tracing::info!(workflow = name, step, "workflow initiated");
    Ok((state, prompt))
}

/// Move the active workflow `name` to `step`, or to the resolved next step.
///
/// `variables` are merged into the workflow context. Without an explicit
/// `status`, reaching `completion` marks the workflow completed and any
/// other step marks it in progress.
pub fn advance_workflow(
    store: &StateStore,
    renderer: &PromptRenderer,
    name: &str,
    step: Option<&str>,
    variables: &Map<String, Value>,
    status: Option<WorkflowStatus>,
) -> Result<(WorkflowState, RenderedPrompt)> {
    let current = get_workflow_state(store)
        .filter(|s| s.active == name)
        .ok_or_else(|| AgdtError::WorkflowNotActive(name.to_string()))?;
    let def = definition(name)?;

    let next = match step {
        Some(s) if def.has_step(s) => s.to_string(),
        Some(s) => {
            return Err(AgdtError::UnknownStep {
                workflow: name.to_string(),
                step: s.to_string(),
            })
        }
        None => resolve_next_step(store, &current)?.to_string(),
    };
    let status = status.unwrap_or(if next == COMPLETION_STEP {
        WorkflowStatus::Completed
    } else {
        WorkflowStatus::InProgress
    });

    let state = set_workflow_state(store, name, status, &next, Some(variables))?;
    let prompt = renderer.render(name, &next, &prompt_variables(store, def, &state))?;
    tracing::info!(workflow = name, from = %current.step, to = %next, %status, "workflow advanced");
    Ok((state, prompt))
}

/// Context first, then fresh values for the workflow's keys from state.
fn prompt_variables(store: &StateStore, def: &WorkflowDef, state: &WorkflowState) -> Map<String, Value> {
    let mut vars = state.context.clone();
    vars.extend(collect_variables(&store.load(), workflow_keys(def, &[])));
    vars
}

#[derive(Debug, Clone, Serialize)]
pub struct NextPrompt {
    pub state: WorkflowState,
    /// Step an argument-less advance would move to.
    pub next_step: String,
    pub prompt: RenderedPrompt,
}

/// Re-render the prompt for the active workflow's current step.
pub fn get_next_workflow_prompt(
    store: &StateStore,
    renderer: &PromptRenderer,
) -> Result<Option<NextPrompt>> {
    let Some(state) = get_workflow_state(store) else {
        return Ok(None);
    };
    let def = definition(&state.active)?;
    let next_step = resolve_next_step(store, &state)?.to_string();
    let prompt = renderer.render(&state.active, &state.step, &prompt_variables(store, def, &state))?;
    Ok(Some(NextPrompt {
        state,
        next_step,
        prompt,
    }))
}

// ---------------------------------------------------------------------------
// Auto-advance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AutoAdvance {
    pub workflow: String,
    pub from_step: String,
    pub to_step: String,
    /// Background task started as part of the transition.
    pub triggered: Option<BackgroundTask>,
}

/// Advance the active workflow in response to `completed` finishing.
///
/// Only `pull-request-review` moves on its own: `file-review` with a queue
/// ready for summary goes to `summary` and starts the summary task, and
/// `summary` goes to `completion` once that summary task completes.
pub fn try_auto_advance<L: BackgroundLauncher + ?Sized>(
    store: &StateStore,
    launcher: &L,
    completed: &BackgroundTask,
) -> Result<Option<AutoAdvance>> {
    let Some(state) = get_workflow_state(store) else {
        return Ok(None);
    };
    if state.active != PULL_REQUEST_REVIEW || state.is_completed() {
        return Ok(None);
    }

    match state.step.as_str() {
        FILE_REVIEW_STEP => {
            let Some(pr) = pull_request_id(store, &state) else {
                return Ok(None);
            };
            if !review::get_queue_status(store.dir(), &pr).ready_for_summary() {
                return Ok(None);
            }
            // The step only moves once the summary task exists; a failed
            // launch leaves the workflow on file-review for the next attempt.
            let mut args = Map::new();
            args.insert(PULL_REQUEST_ID.into(), Value::String(pr));
            let task = launcher.run_function_in_background(
                review::SUMMARY_MODULE,
                review::SUMMARY_FUNCTION,
                review::SUMMARY_COMMAND,
                args,
            )?;
            set_workflow_state(store, &state.active, WorkflowStatus::InProgress, SUMMARY_STEP, None)?;
            tracing::info!(task_id = %task.id, "review queue complete; summary started");
            Ok(Some(AutoAdvance {
                workflow: state.active,
                from_step: FILE_REVIEW_STEP.into(),
                to_step: SUMMARY_STEP.into(),
                triggered: Some(task),
            }))
        }
        SUMMARY_STEP if completed.command == review::SUMMARY_COMMAND => {
            set_workflow_state(
                store,
                &state.active,
                WorkflowStatus::Completed,
                COMPLETION_STEP,
                None,
            )?;
            tracing::info!("summary finished; pull request review complete");
            Ok(Some(AutoAdvance {
                workflow: state.active,
                from_step: SUMMARY_STEP.into(),
                to_step: COMPLETION_STEP.into(),
                triggered: None,
            }))
        }
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::{testing::RecordingLauncher, TaskLauncher};
    use crate::review::ReviewQueue;
    use crate::task::TaskStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StateStore, PromptRenderer) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("temp"));
        let renderer = PromptRenderer::new(None, store.dir());
        (dir, store, renderer)
    }

    fn ctx(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn every_workflow_ends_in_completion_and_knows_its_fallback() {
        for def in WORKFLOWS {
            assert_eq!(def.steps.first(), Some(&INITIATE_STEP), "{}", def.name);
            assert_eq!(def.steps.last(), Some(&COMPLETION_STEP), "{}", def.name);
            assert!(def.has_step(def.fallback_step), "{}", def.name);
        }
    }

    #[test]
    fn linear_step_order() {
        let def = definition("work-on-jira-issue").unwrap();
        assert_eq!(next_step(def, "planning", false), "checklist-creation");
        assert_eq!(next_step(def, "pull-request", false), "completion");
        assert_eq!(next_step(def, "completion", false), "completion");
        assert_eq!(next_step(def, "no-such-step", false), "planning");
    }

    #[test]
    fn pull_request_review_waits_for_queue() {
        let def = definition(PULL_REQUEST_REVIEW).unwrap();
        assert_eq!(next_step(def, "file-review", false), "file-review");
        assert_eq!(next_step(def, "file-review", true), "summary");
        assert_eq!(next_step(def, "summary", false), "completion");
    }

    #[test]
    fn context_merge_with_deletion_keeps_started_at() {
        let (_d, store, _) = setup();
        let first = set_workflow_state(
            &store,
            "work-on-jira-issue",
            WorkflowStatus::Initiated,
            "initiate",
            Some(&ctx(json!({"k1": "v1"}))),
        )
        .unwrap();
        let second = set_workflow_state(
            &store,
            "work-on-jira-issue",
            WorkflowStatus::InProgress,
            "setup",
            Some(&ctx(json!({"k1": null, "k2": "v2"}))),
        )
        .unwrap();
        assert_eq!(second.context, ctx(json!({"k2": "v2"})));
        assert_eq!(second.started_at, first.started_at);
        assert_eq!(get_workflow_state(&store).unwrap(), second);
    }

    #[test]
    fn different_workflow_discards_context() {
        let (_d, store, _) = setup();
        set_workflow_state(&store, "a", WorkflowStatus::Initiated, "initiate", Some(&ctx(json!({"k": 1})))).unwrap();
        let other = set_workflow_state(&store, "b", WorkflowStatus::Initiated, "initiate", None).unwrap();
        assert!(other.context.is_empty());
        assert!(is_workflow_active(&store, Some("b")));
        assert!(!is_workflow_active(&store, Some("a")));
    }

    #[test]
    fn initiate_without_required_key_names_the_remedy() {
        let (_d, store, renderer) = setup();
        let err = initiate_workflow(&store, &renderer, "work-on-jira-issue", &[], &[], None).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("jira.issue_key"));
        assert!(msg.contains("agdt-set jira.issue_key <value>"));
        assert!(get_workflow_state(&store).is_none());
    }

    #[test]
    fn initiate_records_state_and_renders_prompt() {
        let (_d, store, renderer) = setup();
        store.set("jira.issue_key", json!("DFLY-42")).unwrap();
        let (state, prompt) =
            initiate_workflow(&store, &renderer, "work-on-jira-issue", &[], &[], None).unwrap();
        assert_eq!(state.status, WorkflowStatus::Initiated);
        assert_eq!(state.step, "initiate");
        assert_eq!(state.context.get("jira_issue_key"), Some(&json!("DFLY-42")));
        assert!(prompt.text.contains("work-on-jira-issue"));
        assert!(prompt.saved_to.exists());
    }

    #[test]
    fn advance_requires_active_workflow() {
        let (_d, store, renderer) = setup();
        let err = advance_workflow(&store, &renderer, "work-on-jira-issue", None, &Map::new(), None)
            .unwrap_err();
        assert!(matches!(err, AgdtError::WorkflowNotActive(_)));
        assert!(err.to_string().contains("agdt-initiate-workflow work-on-jira-issue"));
    }

    #[test]
    fn advance_past_end_completes() {
        let (_d, store, renderer) = setup();
        store.set("jira.issue_key", json!("DFLY-1")).unwrap();
        initiate_workflow(&store, &renderer, "work-on-jira-issue", &[], &[], None).unwrap();

        let (s, _) = advance_workflow(&store, &renderer, "work-on-jira-issue", Some("planning"), &Map::new(), None).unwrap();
        assert_eq!(s.status, WorkflowStatus::InProgress);
        let (s, _) = advance_workflow(&store, &renderer, "work-on-jira-issue", None, &Map::new(), None).unwrap();
        assert_eq!(s.step, "checklist-creation");

        let (s, _) = advance_workflow(&store, &renderer, "work-on-jira-issue", Some("completion"), &Map::new(), None).unwrap();
        assert_eq!(s.status, WorkflowStatus::Completed);
        let (s, _) = advance_workflow(&store, &renderer, "work-on-jira-issue", None, &Map::new(), None).unwrap();
        assert_eq!(s.step, "completion");
        assert_eq!(s.status, WorkflowStatus::Completed);

        let err = advance_workflow(&store, &renderer, "work-on-jira-issue", Some("bogus"), &Map::new(), None)
            .unwrap_err();
        assert!(matches!(err, AgdtError::UnknownStep { .. }));
    }

    #[test]
    fn file_review_auto_advances_to_summary_and_then_completion() {
        let (_d, store, _) = setup();
        store.set(PULL_REQUEST_ID, json!("55")).unwrap();
        set_workflow_state(&store, PULL_REQUEST_REVIEW, WorkflowStatus::InProgress, FILE_REVIEW_STEP, None).unwrap();
        ReviewQueue::update(store.dir(), "55", |q| {
            q.add_files(["a.rs"]);
            q.complete("a.rs")
        })
        .unwrap();

        let launcher = RecordingLauncher::new(store.clone());
        let submit = BackgroundTask::new("t1", review::SUBMIT_COMMAND, "/tmp/t1.log");
        let adv = try_auto_advance(&store, &launcher, &submit).unwrap().unwrap();
        assert_eq!(adv.to_step, SUMMARY_STEP);
        let summary_task = adv.triggered.unwrap();
        assert_eq!(summary_task.command, review::SUMMARY_COMMAND);
        assert_eq!(launcher.launched(), vec!["agdt.review.generate_summary".to_string()]);
        assert_eq!(get_workflow_state(&store).unwrap().step, SUMMARY_STEP);

        // an unrelated task finishing does not complete the workflow
        assert!(try_auto_advance(&store, &launcher, &submit).unwrap().is_none());

        let mut done = summary_task;
        done.status = TaskStatus::Completed;
        let adv = try_auto_advance(&store, &launcher, &done).unwrap().unwrap();
        assert_eq!(adv.to_step, COMPLETION_STEP);
        let state = get_workflow_state(&store).unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
    }

    #[test]
    fn failed_summary_launch_keeps_file_review_step() {
        let (_d, store, _) = setup();
        store.set(PULL_REQUEST_ID, json!("56")).unwrap();
        set_workflow_state(&store, PULL_REQUEST_REVIEW, WorkflowStatus::InProgress, FILE_REVIEW_STEP, None).unwrap();
        ReviewQueue::update(store.dir(), "56", |q| {
            q.add_files(["a.rs"]);
            q.complete("a.rs")
        })
        .unwrap();

        let launcher = TaskLauncher::new(store.clone(), store.dir().join("no-such-agdt-binary"));
        let submit = BackgroundTask::new("t1", review::SUBMIT_COMMAND, "/tmp/t1.log");
        let err = try_auto_advance(&store, &launcher, &submit).unwrap_err();
        assert!(matches!(err, AgdtError::SpawnFailed(_)));
        assert_eq!(get_workflow_state(&store).unwrap().step, FILE_REVIEW_STEP);

        // once launching works again the same completion advances normally
        let recording = RecordingLauncher::new(store.clone());
        let adv = try_auto_advance(&store, &recording, &submit).unwrap().unwrap();
        assert_eq!(adv.to_step, SUMMARY_STEP);
    }

    #[test]
    fn incomplete_queue_does_not_auto_advance() {
        let (_d, store, _) = setup();
        store.set(PULL_REQUEST_ID, json!(7)).unwrap();
        set_workflow_state(&store, PULL_REQUEST_REVIEW, WorkflowStatus::InProgress, FILE_REVIEW_STEP, None).unwrap();
        ReviewQueue::update(store.dir(), "7", |q| Ok(q.add_files(["a.rs"]))).unwrap();

        let launcher = RecordingLauncher::new(store.clone());
        let t = BackgroundTask::new("t", review::SUBMIT_COMMAND, "/tmp/t.log");
        assert!(try_auto_advance(&store, &launcher, &t).unwrap().is_none());
        assert!(launcher.launched().is_empty());
    }

    #[test]
    fn status_parsing() {
        assert_eq!("in-progress".parse::<WorkflowStatus>().unwrap(), WorkflowStatus::InProgress);
        assert!("paused".parse::<WorkflowStatus>().is_err());
        assert_eq!(serde_json::to_value(WorkflowStatus::InProgress).unwrap(), json!("in-progress"));
    }
}
