use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgdtError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("{}", missing_keys_message(.workflow, .keys))]
    MissingStateKeys { workflow: String, keys: Vec<String> },

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("unknown step '{step}' for workflow '{workflow}'")]
    UnknownStep { workflow: String, step: String },

    #[error("workflow '{0}' is not active: start it first with 'agdt-initiate-workflow {0}'")]
    WorkflowNotActive(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("no background task id given and none remembered: run a background command first or pass --task-id")]
    NoTaskId,

    #[error("invalid function reference '{0}': expected a dotted identifier")]
    InvalidFunctionRef(String),

    #[error("no background function registered for {module_path}.{function_name}")]
    UnknownFunction {
        module_path: String,
        function_name: String,
    },

    #[error("failed to spawn background task: {0}")]
    SpawnFailed(String),

    #[error("'{command}' exited with code {code}")]
    CommandFailed { command: String, code: i32 },

    #[error("invalid review outcome '{0}': expected Approve, Changes or Suggest")]
    InvalidOutcome(String),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("file '{0}' is not in the review queue")]
    NotInQueue(String),

    #[error("template is missing variables: {}", .0.join(", "))]
    MissingTemplateVariables(Vec<String>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

fn missing_keys_message(workflow: &str, keys: &[String]) -> String {
    let mut msg = format!(
        "cannot start workflow '{workflow}': missing required state: {}",
        keys.join(", ")
    );
    for key in keys {
        msg.push_str(&format!("\n  set it with: agdt-set {key} <value>"));
    }
    msg
}

pub type Result<T> = std::result::Result<T, AgdtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_names_remediation_command() {
        let err = AgdtError::MissingStateKeys {
            workflow: "work-on-jira-issue".into(),
            keys: vec!["jira.issue_key".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("jira.issue_key"));
        assert!(msg.contains("agdt-set jira.issue_key <value>"));
    }
}
