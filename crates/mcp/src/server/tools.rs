//! Tool bodies behind the MCP server.
//!
//! Each function takes the store and a request and returns the structured
//! JSON payload, so the tools can be exercised without a transport.

use std::sync::Arc;

use rmcp::model::ErrorData;
use serde::Serialize;
use serde_json::{Map, Value, json};
use stepwise_engine::{resolve_next, validate_definition_json, validate_step_output};
use stepwise_types::WorkflowDefinition;
use tracing::info;

use crate::server::errors::{internal_error, invalid_params_error, resolve_error, store_error, workflow_not_found};
use crate::server::types::{WorkflowGetMode, WorkflowGetRequest, WorkflowNextRequest, WorkflowValidateJsonRequest, WorkflowValidateRequest};
use crate::store::WorkflowStore;

pub fn list_workflows(store: &dyn WorkflowStore) -> Result<Value, ErrorData> {
    let workflows = store.summaries().map_err(store_error)?;
    info!(count = workflows.len(), "listed workflows");
    Ok(json!({ "workflows": to_json(&workflows)? }))
}

pub fn get_workflow(store: &dyn WorkflowStore, request: &WorkflowGetRequest) -> Result<Value, ErrorData> {
    let definition = find_workflow(store, &request.id)?;
    let mut payload = workflow_metadata(&definition);

    if request.mode == WorkflowGetMode::Preview {
        let response = resolve_next(&definition, &[], &Map::new()).map_err(resolve_error)?;
        payload.insert("firstStep".to_string(), to_json(&response.step)?);
    }

    Ok(Value::Object(payload))
}

pub fn next_step(store: &dyn WorkflowStore, request: &WorkflowNextRequest) -> Result<Value, ErrorData> {
    let definition = find_workflow(store, &request.workflow_id)?;
    let response = resolve_next(&definition, &request.completed_steps, &request.context).map_err(resolve_error)?;
    to_json(&response)
}

pub fn validate_output(store: &dyn WorkflowStore, request: &WorkflowValidateRequest) -> Result<Value, ErrorData> {
    if request.step_id.trim().is_empty() {
        return Err(invalid_params_error(
            "MISSING_STEP_ID",
            "stepId must not be empty",
            json!({ "workflow_id": request.workflow_id }),
            "Pass the id of the step whose output is being checked.",
        ));
    }
    let definition = find_workflow(store, &request.workflow_id)?;
    let result = validate_step_output(&definition, &request.step_id, &request.output, &request.context).map_err(resolve_error)?;
    info!(workflow_id = %definition.id, step_id = %request.step_id, valid = result.valid, "validated step output");
    to_json(&result)
}

pub fn validate_workflow_json(request: &WorkflowValidateJsonRequest) -> Result<Value, ErrorData> {
    let report = validate_definition_json(&request.workflow_json);
    to_json(&report)
}

fn find_workflow(store: &dyn WorkflowStore, workflow_id: &str) -> Result<Arc<WorkflowDefinition>, ErrorData> {
    if workflow_id.trim().is_empty() {
        return Err(invalid_params_error(
            "MISSING_WORKFLOW_ID",
            "workflow id must not be empty",
            Value::Null,
            "Call workflow_list to discover available workflow ids.",
        ));
    }
    store
        .get(workflow_id)
        .map_err(store_error)?
        .ok_or_else(|| workflow_not_found(workflow_id))
}

fn workflow_metadata(definition: &WorkflowDefinition) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("id".into(), Value::String(definition.id.clone()));
    payload.insert("name".into(), Value::String(definition.name.clone()));
    payload.insert("description".into(), Value::String(definition.description.clone()));
    payload.insert(
        "version".into(),
        definition.version.clone().map(Value::String).unwrap_or(Value::Null),
    );
    payload.insert("preconditions".into(), json!(definition.preconditions));
    payload.insert("clarificationPrompts".into(), json!(definition.clarification_prompts));
    payload.insert("metaGuidance".into(), json!(definition.meta_guidance));
    payload.insert("totalSteps".into(), json!(definition.steps.len()));
    payload
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, ErrorData> {
    serde_json::to_value(value).map_err(|error| {
        internal_error(
            "SERIALIZATION_ERROR",
            format!("failed to serialize tool response: {error}"),
            Value::Null,
            false,
            "Retry the request; report the workflow if the failure persists.",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use rmcp::model::ErrorCode;

    fn store() -> InMemoryStore {
        let review: WorkflowDefinition = serde_json::from_value(json!({
            "id": "review", "name": "Review", "description": "Review a change",
            "preconditions": ["A diff is available"],
            "steps": [
                { "id": "read", "title": "Read", "prompt": "Read the diff" },
                {
                    "id": "report", "title": "Report", "prompt": "Write the report",
                    "validationCriteria": [{ "type": "contains", "value": "Verdict" }]
                }
            ]
        }))
        .expect("parse review");
        InMemoryStore::new([review])
    }

    #[test]
    fn list_returns_summaries() {
        let payload = list_workflows(&store()).expect("list");
        assert_eq!(payload["workflows"][0]["id"], "review");
        assert_eq!(payload["workflows"][0]["description"], "Review a change");
    }

    #[test]
    fn get_preview_includes_first_step() {
        let store = store();
        let request = WorkflowGetRequest {
            id: "review".into(),
            mode: WorkflowGetMode::Metadata,
        };
        let metadata = get_workflow(&store, &request).expect("metadata");
        assert_eq!(metadata["preconditions"], json!(["A diff is available"]));
        assert_eq!(metadata["totalSteps"], 2);
        assert!(metadata.get("firstStep").is_none());

        let request = WorkflowGetRequest {
            mode: WorkflowGetMode::Preview,
            ..request
        };
        let preview = get_workflow(&store, &request).expect("preview");
        assert_eq!(preview["firstStep"]["id"], "read");
    }

    #[test]
    fn next_walks_the_workflow() {
        let store = store();
        let mut request = WorkflowNextRequest {
            workflow_id: "review".into(),
            completed_steps: vec!["read".into()],
            context: Map::new(),
        };
        let payload = next_step(&store, &request).expect("next");
        assert_eq!(payload["done"], false);
        assert_eq!(payload["step"]["id"], "report");

        request.completed_steps.push("report".into());
        let payload = next_step(&store, &request).expect("next");
        assert_eq!(payload["done"], true);
        assert_eq!(payload["guidance"]["prompt"], "Workflow complete.");
    }

    #[test]
    fn unknown_workflow_and_step_are_not_found() {
        let store = store();
        let error = next_step(
            &store,
            &WorkflowNextRequest {
                workflow_id: "ghost".into(),
                completed_steps: Vec::new(),
                context: Map::new(),
            },
        )
        .expect_err("unknown workflow");
        assert_eq!(error.code, ErrorCode::RESOURCE_NOT_FOUND);

        let error = validate_output(
            &store,
            &WorkflowValidateRequest {
                workflow_id: "review".into(),
                step_id: "ghost".into(),
                output: "text".into(),
                context: Map::new(),
            },
        )
        .expect_err("unknown step");
        assert_eq!(error.code, ErrorCode::RESOURCE_NOT_FOUND);
        assert_eq!(error.data.expect("error data")["error_code"], "STEP_NOT_FOUND");
    }

    #[test]
    fn validate_checks_output_and_documents() {
        let store = store();
        let result = validate_output(
            &store,
            &WorkflowValidateRequest {
                workflow_id: "review".into(),
                step_id: "report".into(),
                output: "Verdict: ship it".into(),
                context: Map::new(),
            },
        )
        .expect("validate output");
        assert_eq!(result["valid"], true);

        let report = validate_workflow_json(&WorkflowValidateJsonRequest {
            workflow_json: r#"{ "id": "x", "name": "X", "steps": [] }"#.into(),
        })
        .expect("validate json");
        assert_eq!(report["valid"], false);
        assert_eq!(report["issues"][0]["code"], "empty_steps");
    }
}
