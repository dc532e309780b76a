//! Structured MCP error payloads.

use chrono::Utc;
use rmcp::model::ErrorData;
use serde_json::{Value, json};
use stepwise_engine::ResolveError;

use crate::store::StoreError;

fn build_error_data(error_code: &str, category: &str, message: &str, context: Value, retryable: bool, suggested_action: &str) -> Value {
    json!({
        "error_code": error_code,
        "category": category,
        "message": message,
        "context": context,
        "retryable": retryable,
        "suggested_action": suggested_action,
        "correlation_id": format!("stepwise-{}", Utc::now().timestamp_millis()),
    })
}

pub fn invalid_params_error(error_code: &str, message: impl Into<String>, context: Value, suggested_action: &str) -> ErrorData {
    let message = message.into();
    ErrorData::invalid_params(
        message.clone(),
        Some(build_error_data(error_code, "validation", &message, context, false, suggested_action)),
    )
}

pub fn not_found_error(error_code: &str, message: impl Into<String>, context: Value, suggested_action: &str) -> ErrorData {
    let message = message.into();
    ErrorData::resource_not_found(
        message.clone(),
        Some(build_error_data(error_code, "not_found", &message, context, false, suggested_action)),
    )
}

pub fn internal_error(error_code: &str, message: impl Into<String>, context: Value, retryable: bool, suggested_action: &str) -> ErrorData {
    let message = message.into();
    ErrorData::internal_error(
        message.clone(),
        Some(build_error_data(error_code, "internal", &message, context, retryable, suggested_action)),
    )
}

pub fn workflow_not_found(workflow_id: &str) -> ErrorData {
    resolve_error(ResolveError::WorkflowNotFound(workflow_id.to_string()))
}

/// Maps engine errors onto MCP error codes, keeping the engine's error code in the payload.
pub fn resolve_error(error: ResolveError) -> ErrorData {
    let message = error.to_string();
    match &error {
        ResolveError::WorkflowNotFound(workflow_id) => not_found_error(
            error.code(),
            message,
            json!({ "workflow_id": workflow_id }),
            "Call workflow_list to discover available workflow ids.",
        ),
        ResolveError::StepNotFound { workflow_id, step_id } => not_found_error(
            error.code(),
            message,
            json!({ "workflow_id": workflow_id, "step_id": step_id }),
            "Use a step id from workflow_next or workflow_get.",
        ),
        ResolveError::InvalidDefinition { workflow_id, .. } | ResolveError::Consistency { workflow_id, .. } => internal_error(
            error.code(),
            message,
            json!({ "workflow_id": workflow_id }),
            false,
            "Fix the workflow definition and check it with workflow_validate_json.",
        ),
        ResolveError::InvalidCriteria { step_id, .. } => internal_error(
            error.code(),
            message,
            json!({ "step_id": step_id }),
            false,
            "Fix the step's validationCriteria in the workflow definition.",
        ),
    }
}

pub fn store_error(error: StoreError) -> ErrorData {
    internal_error(
        "WORKFLOW_STORE_ERROR",
        error.to_string(),
        Value::Null,
        true,
        "Check that the workflow directory is readable and retry.",
    )
}
