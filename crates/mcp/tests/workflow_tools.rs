use std::fs;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use stepwise_mcp::server::{WorkflowGetMode, WorkflowGetRequest, WorkflowNextRequest, WorkflowValidateRequest};
use stepwise_mcp::server::{get_workflow, list_workflows, next_step, validate_output};
use stepwise_mcp::{CachingStore, FileStore, ValidatingStore, WorkflowStore};

fn release_store(temp_dir: &tempfile::TempDir) -> CachingStore<ValidatingStore<FileStore>> {
    fs::write(
        temp_dir.path().join("release_checklist.yaml"),
        include_str!("data/release_checklist.yaml"),
    )
    .expect("write fixture");
    CachingStore::new(ValidatingStore::new(FileStore::new(temp_dir.path())), Duration::from_secs(60))
}

/// Drives `workflow_next` the way an agent would and returns the presented step ids.
fn walk(store: &dyn WorkflowStore, context: Value) -> Vec<(String, Value)> {
    let mut request = WorkflowNextRequest {
        workflow_id: "release-checklist".into(),
        completed_steps: Vec::new(),
        context: context.as_object().cloned().expect("object context"),
    };
    let mut presented = Vec::new();

    loop {
        let response = next_step(store, &request).expect("workflow_next");
        for loop_id in response["completedLoops"].as_array().expect("completedLoops") {
            request.completed_steps.push(loop_id.as_str().expect("loop id").to_string());
        }
        if response["done"] == true {
            return presented;
        }
        let step_id = response["step"]["id"].as_str().expect("step id").to_string();
        presented.push((step_id.clone(), response["context"].get("target").cloned().unwrap_or(Value::Null)));
        request.completed_steps.push(step_id);
        request.context = response["context"].as_object().cloned().expect("context");
        assert!(presented.len() < 10, "workflow did not converge: {presented:?}");
    }
}

#[test]
fn release_checklist_runs_each_target_then_publishes() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let store = release_store(&temp_dir);

    let presented = walk(&store, json!({ "targetCount": 2, "dryRun": false }));

    assert_eq!(
        presented,
        vec![
            ("bump".to_string(), Value::Null),
            ("verify-target".to_string(), json!(1)),
            ("verify-target".to_string(), json!(2)),
            ("publish".to_string(), Value::Null),
        ]
    );
    assert!(store.stats().hits > 0);
}

#[test]
fn dry_run_skips_publish() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let store = release_store(&temp_dir);

    let presented = walk(&store, json!({ "targetCount": 1, "dryRun": true }));
    let ids: Vec<&str> = presented.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["bump", "verify-target"]);
}

#[test]
fn listing_and_preview_hide_referenced_bodies() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let store: Arc<dyn WorkflowStore> = Arc::new(release_store(&temp_dir));

    let listing = list_workflows(store.as_ref()).expect("workflow_list");
    assert_eq!(
        listing,
        json!({ "workflows": [{
            "id": "release-checklist",
            "name": "Release checklist",
            "description": "Prepare and verify a release",
            "version": "1.2.0"
        }] })
    );

    let preview = get_workflow(
        store.as_ref(),
        &WorkflowGetRequest {
            id: "release-checklist".into(),
            mode: WorkflowGetMode::Preview,
        },
    )
    .expect("workflow_get");
    assert_eq!(preview["metaGuidance"], json!(["Keep the changelog current"]));
    assert_eq!(preview["firstStep"]["id"], "bump");
}

#[test]
fn target_report_is_checked_against_its_pattern() {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let store = release_store(&temp_dir);
    let request = |output: &str| WorkflowValidateRequest {
        workflow_id: "release-checklist".into(),
        step_id: "verify-target".into(),
        output: output.into(),
        context: Map::new(),
    };

    let passed = validate_output(&store, &request("OK: all tests green")).expect("workflow_validate");
    assert_eq!(passed["valid"], true);

    let failed = validate_output(&store, &request("3 tests failed")).expect("workflow_validate");
    assert_eq!(failed["valid"], false);
    assert_eq!(failed["issues"], json!(["Report must start with OK"]));
}
