use thiserror::Error;

/// Fatal outcomes of a resolution or validation call.
///
/// Caller-state anomalies never surface here; they are recovered and reported
/// as notes on the response instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("workflow '{0}' was not found")]
    WorkflowNotFound(String),

    #[error("workflow '{workflow_id}' is not a valid definition: {reason}")]
    InvalidDefinition { workflow_id: String, reason: String },

    /// The definition violates a resolver invariant such as unique ids or acyclic loop bodies.
    #[error("workflow '{workflow_id}' is internally inconsistent: {reason}")]
    Consistency { workflow_id: String, reason: String },

    #[error("step '{step_id}' was not found in workflow '{workflow_id}'")]
    StepNotFound { workflow_id: String, step_id: String },

    #[error("step '{step_id}' has invalid validation criteria: {reason}")]
    InvalidCriteria { step_id: String, reason: String },
}

impl ResolveError {
    pub fn invalid_definition(workflow_id: &str, reason: impl Into<String>) -> Self {
        ResolveError::InvalidDefinition {
            workflow_id: workflow_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn consistency(workflow_id: &str, reason: impl Into<String>) -> Self {
        ResolveError::Consistency {
            workflow_id: workflow_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn step_not_found(workflow_id: &str, step_id: &str) -> Self {
        ResolveError::StepNotFound {
            workflow_id: workflow_id.to_string(),
            step_id: step_id.to_string(),
        }
    }

    pub fn invalid_criteria(step_id: &str, reason: impl Into<String>) -> Self {
        ResolveError::InvalidCriteria {
            step_id: step_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code used in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::WorkflowNotFound(_) => "WORKFLOW_NOT_FOUND",
            ResolveError::InvalidDefinition { .. } => "INVALID_WORKFLOW_DEFINITION",
            ResolveError::Consistency { .. } => "WORKFLOW_CONSISTENCY_ERROR",
            ResolveError::StepNotFound { .. } => "STEP_NOT_FOUND",
            ResolveError::InvalidCriteria { .. } => "INVALID_VALIDATION_CRITERIA",
        }
    }
}
