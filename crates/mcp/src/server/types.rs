//! MCP tool request payload types.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowGetMode {
    /// Definition metadata only.
    #[default]
    Metadata,
    /// Metadata plus the first step a fresh run would be given.
    Preview,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkflowGetRequest {
    #[schemars(description = "Workflow identifier from workflow_list.")]
    pub id: String,
    #[serde(default)]
    #[schemars(description = "`metadata` (default) or `preview`, which also returns the first step.")]
    pub mode: WorkflowGetMode,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNextRequest {
    #[schemars(description = "Workflow identifier from workflow_list.")]
    pub workflow_id: String,
    #[serde(default)]
    #[schemars(description = "Ids of steps already completed, plus every id reported in completedLoops.")]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    #[schemars(description = "Context returned by the previous workflow_next call, with any variables you set.")]
    pub context: Map<String, Value>,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowValidateRequest {
    #[schemars(description = "Workflow identifier from workflow_list.")]
    pub workflow_id: String,
    #[schemars(description = "Step whose output is being checked.")]
    pub step_id: String,
    #[schemars(description = "Output produced for the step.")]
    pub output: String,
    #[serde(default)]
    #[schemars(description = "Context used to evaluate conditional validation rules.")]
    pub context: Map<String, Value>,
}

#[derive(JsonSchema, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowValidateJsonRequest {
    #[schemars(description = "Workflow definition as a JSON string or JSON object.", with = "serde_json::Value")]
    #[serde(deserialize_with = "deserialize_workflow_document")]
    pub workflow_json: String,
}

fn deserialize_workflow_document<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        document => serde_json::to_string(&document).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn next_request_defaults_history_and_context() {
        let request: WorkflowNextRequest = serde_json::from_value(json!({ "workflowId": "review" })).expect("parse request");
        assert_eq!(request.workflow_id, "review");
        assert!(request.completed_steps.is_empty());
        assert!(request.context.is_empty());
    }

    #[test]
    fn validate_json_accepts_object_documents() {
        let request: WorkflowValidateJsonRequest =
            serde_json::from_value(json!({ "workflowJson": { "id": "wf" } })).expect("parse request");
        assert_eq!(request.workflow_json, r#"{"id":"wf"}"#);

        let request: WorkflowGetRequest = serde_json::from_value(json!({ "id": "wf", "mode": "preview" })).expect("parse request");
        assert_eq!(request.mode, WorkflowGetMode::Preview);
    }
}
