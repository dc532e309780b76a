use std::sync::Arc;

use stepwise_engine::validate_definition;
use stepwise_types::WorkflowDefinition;
use tracing::warn;

use super::{StoreError, WorkflowStore};

/// Hides definitions whose validation report is invalid.
#[derive(Debug, Clone)]
pub struct ValidatingStore<S> {
    inner: S,
}

impl<S: WorkflowStore> ValidatingStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn is_valid(definition: &WorkflowDefinition) -> bool {
    let report = validate_definition(definition);
    if !report.valid {
        let issues: Vec<String> = report
            .issues
            .iter()
            .map(|issue| format!("{}: {}", issue.path, issue.message))
            .collect();
        warn!(workflow_id = %definition.id, issues = ?issues, "dropping invalid workflow definition");
    }
    report.valid
}

impl<S: WorkflowStore> WorkflowStore for ValidatingStore<S> {
    fn list(&self) -> Result<Vec<Arc<WorkflowDefinition>>, StoreError> {
        Ok(self.inner.list()?.into_iter().filter(|definition| is_valid(definition)).collect())
    }

    fn get(&self, id: &str) -> Result<Option<Arc<WorkflowDefinition>>, StoreError> {
        Ok(self.inner.get(id)?.filter(|definition| is_valid(definition)))
    }
}
