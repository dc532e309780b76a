//! Workflow definition stores.
//!
//! A [`WorkflowStore`] hands out definitions by id. Stores compose: the
//! directory store can be wrapped by [`ValidatingStore`] and then by
//! [`CachingStore`], which is how [`build_store`] assembles the server's store.

mod caching;
mod file;
mod memory;
mod validating;

use std::path::PathBuf;
use std::sync::Arc;

use stepwise_types::{WorkflowDefinition, WorkflowSummary};
use thiserror::Error;

use crate::config::ServerConfig;

pub use caching::{CacheStats, CachingStore};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use validating::ValidatingStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read workflow directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Source of workflow definitions.
pub trait WorkflowStore: Send + Sync {
    /// Every definition, sorted by id.
    fn list(&self) -> Result<Vec<Arc<WorkflowDefinition>>, StoreError>;

    fn get(&self, id: &str) -> Result<Option<Arc<WorkflowDefinition>>, StoreError> {
        Ok(self.list()?.into_iter().find(|definition| definition.id == id))
    }

    fn summaries(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        Ok(self.list()?.iter().map(|definition| definition.summary()).collect())
    }
}

impl<S: WorkflowStore + ?Sized> WorkflowStore for Arc<S> {
    fn list(&self) -> Result<Vec<Arc<WorkflowDefinition>>, StoreError> {
        (**self).list()
    }

    fn get(&self, id: &str) -> Result<Option<Arc<WorkflowDefinition>>, StoreError> {
        (**self).get(id)
    }

    fn summaries(&self) -> Result<Vec<WorkflowSummary>, StoreError> {
        (**self).summaries()
    }
}

/// Builds the directory-backed store described by `config`.
pub fn build_store(config: &ServerConfig) -> Arc<dyn WorkflowStore> {
    let file_store = FileStore::new(&config.workflows_path);
    let inner: Arc<dyn WorkflowStore> = if config.validate_on_load {
        Arc::new(ValidatingStore::new(file_store))
    } else {
        Arc::new(file_store)
    };

    if config.cache_ttl.is_zero() {
        inner
    } else {
        Arc::new(CachingStore::new(inner, config.cache_ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn built_store_reads_configured_directory() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp_dir.path().join("hello.json"),
            r#"{ "id": "hello", "name": "Hello", "steps": [{ "id": "greet", "title": "Greet", "prompt": "Say hello" }] }"#,
        )
        .expect("write workflow");
        fs::write(
            temp_dir.path().join("broken.json"),
            r#"{ "id": "broken", "name": "Broken", "steps": [] }"#,
        )
        .expect("write workflow");

        let config = ServerConfig {
            workflows_path: temp_dir.path().to_path_buf(),
            cache_ttl: Duration::from_secs(60),
            validate_on_load: true,
        };
        let store = build_store(&config);

        let ids: Vec<String> = store.summaries().expect("summaries").into_iter().map(|summary| summary.id).collect();
        assert_eq!(ids, vec!["hello".to_string()]);
        assert!(store.get("broken").expect("get").is_none());
    }
}
