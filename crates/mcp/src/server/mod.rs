mod core;
mod errors;
mod tools;
mod types;

pub use core::{StepwiseServer, serve_stdio};
pub use tools::{get_workflow, list_workflows, next_step, validate_output, validate_workflow_json};
pub use types::{WorkflowGetMode, WorkflowGetRequest, WorkflowNextRequest, WorkflowValidateJsonRequest, WorkflowValidateRequest};
