//! Workflow step prompts.
//!
//! A prompt template is looked up at `<prompts_dir>/<workflow>/default-<step>.md`
//! and falls back to a built-in template. Placeholders use `{{name}}`; a
//! placeholder with no value is an error naming every missing variable.

use crate::error::{AgdtError, Result};
use crate::keypath;
use crate::paths;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("constant regex pattern is valid")
});

#[derive(Debug, Clone, Serialize)]
pub struct RenderedPrompt {
    pub workflow: String,
    pub step: String,
    pub text: String,
    pub saved_to: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PromptRenderer {
    templates_dir: Option<PathBuf>,
    output_dir: PathBuf,
}

impl PromptRenderer {
    /// `output_dir` is the state directory the rendered prompt is saved in.
    pub fn new(templates_dir: Option<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir,
            output_dir: output_dir.into(),
        }
    }

    pub fn template_path(&self, workflow: &str, step: &str) -> Option<PathBuf> {
        self.templates_dir
            .as_ref()
            .map(|d| d.join(workflow).join(format!("default-{step}.md")))
    }

    fn load_template(&self, workflow: &str, step: &str) -> Result<String> {
        if let Some(path) = self.template_path(workflow, step) {
            if let Some(text) = crate::io::read_optional(&path)? {
                tracing::debug!(path = %path.display(), "using prompt template");
                return Ok(text);
            }
        }
        Ok(builtin_template(step))
    }

    /// Render the prompt for `workflow`/`step` and save it under the state directory.
    pub fn render(
        &self,
        workflow: &str,
        step: &str,
        vars: &Map<String, Value>,
    ) -> Result<RenderedPrompt> {
        let template = self.load_template(workflow, step)?;
        let mut all = vars.clone();
        all.insert("workflow".into(), Value::String(workflow.to_string()));
        all.insert("step".into(), Value::String(step.to_string()));
        let text = substitute(&template, &all)?;

        let saved_to = paths::rendered_prompt_path(&self.output_dir, workflow, step);
        crate::io::atomic_write(&saved_to, text.as_bytes())?;
        Ok(RenderedPrompt {
            workflow: workflow.to_string(),
            step: step.to_string(),
            text,
            saved_to,
        })
    }
}

/// Replace every `{{name}}` in `template`. A name resolves as a flat key,
/// then with dots turned into underscores, then as a dotted path.
pub fn substitute(template: &str, vars: &Map<String, Value>) -> Result<String> {
    let doc = Value::Object(vars.clone());
    let lookup = |name: &str| -> Option<String> {
        let v = vars
            .get(name)
            .or_else(|| vars.get(&name.replace('.', "_")))
            .or_else(|| keypath::get(&doc, name))?;
        match v {
            Value::Null => None,
            v => Some(keypath::display_value(v)),
        }
    };

    let missing: BTreeSet<String> = PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .filter(|name| lookup(name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(AgdtError::MissingTemplateVariables(missing.into_iter().collect()));
    }

    Ok(PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

fn builtin_template(step: &str) -> String {
    let mut out = String::from("# {{workflow}}: {{step}}\n\n");
    out.push_str(step_instructions(step));
    out.push('\n');
    if step != crate::workflow::COMPLETION_STEP {
        out.push_str(
            "\nWhen this step is done run `agdt-advance-workflow {{workflow}}` \
             (or `agdt-task-wait` if a background task is running).\n",
        );
    }
    out
}

fn step_instructions(step: &str) -> &'static str {
    match step {
        "initiate" => "Start the workflow: confirm the work item and gather the context you need.",
        "setup" => "Prepare a working branch for the issue.",
        "retrieve" => "Retrieve the current details of the work item.",
        "planning" => "Write an implementation plan before touching code.",
        "checklist-creation" => "Turn the plan into a checklist of concrete changes.",
        "implementation" => "Implement the checklist items one at a time.",
        "implementation-review" => "Review the implementation against the checklist.",
        "verification" => "Run the test suite and linters; fix what fails.",
        "commit" => "Save the work with `agdt-git-save-work`.",
        "pull-request" => "Open or update the pull request.",
        "file-review" => {
            "Review each file in the queue and submit it with `agdt-review-submit-file`. \
             Check progress with `agdt-review-queue-status`."
        }
        "summary" => "Wait for the review summary, then read it and check it is complete.",
        "drafting" => "Draft the title, description and acceptance criteria.",
        "creation" => "Create the item from the draft.",
        "update" => "Apply the requested changes to the work item.",
        "apply-suggestions" => "Apply the accepted review suggestions.",
        "completion" => "The workflow is complete. Summarize what was done.",
        _ => "Continue with this step.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn vars(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn substitutes_flat_underscored_and_dotted_names() {
        let v = vars(json!({"jira_issue_key": "DFLY-1", "pull_request_id": 12, "jira": {"summary": "fix"}}));
        let out = substitute("{{ jira.issue_key }} #{{pull_request_id}} {{jira.summary}}", &v).unwrap();
        assert_eq!(out, "DFLY-1 #12 fix");
    }

    #[test]
    fn missing_variables_are_listed_once_sorted() {
        let err = substitute("{{b}} {{a}} {{b}}", &Map::new()).unwrap_err();
        match err {
            AgdtError::MissingTemplateVariables(names) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn file_template_wins_over_builtin() {
        let dir = TempDir::new().unwrap();
        let templates = dir.path().join("prompts");
        std::fs::create_dir_all(templates.join("work-on-jira-issue")).unwrap();
        std::fs::write(
            templates.join("work-on-jira-issue/default-planning.md"),
            "Plan {{jira_issue_key}}",
        )
        .unwrap();

        let renderer = PromptRenderer::new(Some(templates), dir.path().join("state"));
        let out = renderer
            .render("work-on-jira-issue", "planning", &vars(json!({"jira_issue_key": "X-9"})))
            .unwrap();
        assert_eq!(out.text, "Plan X-9");
        assert_eq!(std::fs::read_to_string(&out.saved_to).unwrap(), "Plan X-9");
        assert!(out
            .saved_to
            .ends_with("temp-work-on-jira-issue-planning-prompt.md"));
    }

    #[test]
    fn builtin_template_is_used_without_a_file() {
        let dir = TempDir::new().unwrap();
        let renderer = PromptRenderer::new(None, dir.path());
        let out = renderer
            .render("pull-request-review", "file-review", &Map::new())
            .unwrap();
        assert!(out.text.starts_with("# pull-request-review: file-review"));
        assert!(out.text.contains("agdt-review-submit-file"));
    }
}
