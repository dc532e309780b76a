//! Directory-backed store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stepwise_engine::{DefinitionFormat, parse_definition_file};
use stepwise_types::WorkflowDefinition;
use tracing::{debug, warn};

use super::{StoreError, WorkflowStore};

/// Reads every `*.json`, `*.yaml`, and `*.yml` file under a directory on each
/// call. Files that cannot be read or parsed are logged and skipped.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl WorkflowStore for FileStore {
    fn list(&self) -> Result<Vec<Arc<WorkflowDefinition>>, StoreError> {
        if !self.root.exists() {
            debug!(path = %self.root.display(), "workflow directory does not exist");
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        collect_workflow_files(&self.root, &mut paths).map_err(|source| StoreError::ReadDirectory {
            path: self.root.clone(),
            source,
        })?;
        paths.sort();

        let mut definitions: Vec<Arc<WorkflowDefinition>> = Vec::with_capacity(paths.len());
        for path in paths {
            let definition = match parse_definition_file(&path) {
                Ok(definition) => definition,
                Err(error) => {
                    warn!(path = %path.display(), error = %format!("{error:#}"), "skipping unreadable workflow file");
                    continue;
                }
            };
            if definitions.iter().any(|existing| existing.id == definition.id) {
                warn!(
                    workflow_id = %definition.id,
                    path = %path.display(),
                    "duplicate workflow id; keeping the first definition"
                );
                continue;
            }
            definitions.push(Arc::new(definition));
        }

        definitions.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(definitions)
    }
}

fn collect_workflow_files(root: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(root)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(path = %root.display(), %error, "skipping unreadable directory entry");
                continue;
            }
        };
        let path = entry.path();
        let is_dir = entry.file_type().map(|file_type| file_type.is_dir()).unwrap_or(false);
        if is_dir {
            if let Err(error) = collect_workflow_files(&path, files) {
                warn!(path = %path.display(), %error, "skipping unreadable workflow subdirectory");
            }
        } else if DefinitionFormat::from_path(&path).is_some() {
            files.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, name: &str, content: &str) {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write workflow file");
    }

    #[test]
    fn loads_json_and_yaml_sorted_by_id() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        write(
            temp_dir.path(),
            "b.json",
            r#"{ "id": "beta", "name": "Beta", "steps": [{ "id": "s", "title": "S", "prompt": "p" }] }"#,
        );
        write(
            temp_dir.path(),
            "nested/a.yml",
            "id: alpha\nname: Alpha\nsteps:\n  - id: s\n    title: S\n    prompt: p\n",
        );
        write(temp_dir.path(), "notes.txt", "not a workflow");

        let store = FileStore::new(temp_dir.path());
        let ids: Vec<String> = store.list().expect("list").iter().map(|definition| definition.id.clone()).collect();
        assert_eq!(ids, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn skips_broken_files_and_duplicate_ids() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        write(
            temp_dir.path(),
            "1-first.json",
            r#"{ "id": "dup", "name": "First", "steps": [{ "id": "s", "title": "S", "prompt": "p" }] }"#,
        );
        write(
            temp_dir.path(),
            "2-second.yaml",
            "id: dup\nname: Second\nsteps:\n  - id: s\n    title: S\n    prompt: p\n",
        );
        write(temp_dir.path(), "3-broken.json", "{ not json");

        let store = FileStore::new(temp_dir.path());
        let definitions = store.list().expect("list");
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "First");
    }

    #[test]
    fn missing_directory_is_empty() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::new(temp_dir.path().join("absent"));
        assert!(store.list().expect("list").is_empty());
        assert!(store.get("anything").expect("get").is_none());
    }
}
