use std::sync::Arc;

use indexmap::IndexMap;
use stepwise_types::WorkflowDefinition;
use tracing::warn;

use super::{StoreError, WorkflowStore};

/// Fixed set of definitions held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    definitions: IndexMap<String, Arc<WorkflowDefinition>>,
}

impl InMemoryStore {
    /// Later definitions with an id already present are dropped.
    pub fn new(definitions: impl IntoIterator<Item = WorkflowDefinition>) -> Self {
        let mut store = Self::default();
        for definition in definitions {
            store.insert(definition);
        }
        store
    }

    /// Returns false when the id was already taken.
    pub fn insert(&mut self, definition: WorkflowDefinition) -> bool {
        if self.definitions.contains_key(&definition.id) {
            warn!(workflow_id = %definition.id, "duplicate workflow id; keeping the first definition");
            return false;
        }
        self.definitions.insert(definition.id.clone(), Arc::new(definition));
        self.definitions.sort_keys();
        true
    }
}

impl WorkflowStore for InMemoryStore {
    fn list(&self) -> Result<Vec<Arc<WorkflowDefinition>>, StoreError> {
        Ok(self.definitions.values().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Option<Arc<WorkflowDefinition>>, StoreError> {
        Ok(self.definitions.get(id).cloned())
    }
}
