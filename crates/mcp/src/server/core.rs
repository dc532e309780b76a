use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, ErrorData, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use rmcp::transport::stdio;
use rmcp::{ServerHandler, ServiceExt, tool, tool_handler, tool_router};
use tracing::{debug, info};

use crate::server::tools::{get_workflow, list_workflows, next_step, validate_output, validate_workflow_json};
use crate::server::types::{WorkflowGetRequest, WorkflowNextRequest, WorkflowValidateJsonRequest, WorkflowValidateRequest};
use crate::store::WorkflowStore;

const INSTRUCTIONS: &str = "STEPWISE WORKFLOW SERVER.\n\
FLOW:\n\
1) Call workflow_list and pick a workflow id.\n\
2) Optionally call workflow_get with mode=preview.\n\
3) Call workflow_next with workflowId, completedSteps=[] and context={}.\n\
4) Perform the returned step, then call workflow_next again with the step id appended to completedSteps, \
every id from completedLoops appended as well, and the returned context (plus any variables you set).\n\
5) Stop when done=true.\n\
RULES:\n\
- Send the returned context back unchanged apart from your own variables; keys starting with '_' carry loop progress.\n\
- Use workflow_validate to check a step's output before marking it complete.\n\
- Use workflow_validate_json to check a workflow definition while authoring it.";

/// MCP server exposing the workflow tools over a [`WorkflowStore`].
#[derive(Clone)]
pub struct StepwiseServer {
    store: Arc<dyn WorkflowStore>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl StepwiseServer {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            store,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "workflow_list",
        annotations(read_only_hint = true),
        description = "List available workflows with id, name, description, and version."
    )]
    async fn workflow_list(&self) -> Result<CallToolResult, ErrorData> {
        let structured = list_workflows(self.store.as_ref())?;
        Ok(CallToolResult::structured(structured))
    }

    #[tool(
        name = "workflow_get",
        annotations(read_only_hint = true),
        description = "Get workflow metadata. mode=preview also returns the first step of a fresh run."
    )]
    async fn workflow_get(&self, param: Parameters<WorkflowGetRequest>) -> Result<CallToolResult, ErrorData> {
        let structured = get_workflow(self.store.as_ref(), &param.0)?;
        Ok(CallToolResult::structured(structured))
    }

    #[tool(
        name = "workflow_next",
        annotations(read_only_hint = true, idempotent_hint = true),
        description = "Resolve the next step from completedSteps and the context returned by the previous call."
    )]
    async fn workflow_next(&self, param: Parameters<WorkflowNextRequest>) -> Result<CallToolResult, ErrorData> {
        debug!(
            workflow_id = %param.0.workflow_id,
            completed = param.0.completed_steps.len(),
            "workflow_next requested"
        );
        let structured = next_step(self.store.as_ref(), &param.0)?;
        Ok(CallToolResult::structured(structured))
    }

    #[tool(
        name = "workflow_validate",
        annotations(read_only_hint = true),
        description = "Check a step's output against the step's validationCriteria."
    )]
    async fn workflow_validate(&self, param: Parameters<WorkflowValidateRequest>) -> Result<CallToolResult, ErrorData> {
        let structured = validate_output(self.store.as_ref(), &param.0)?;
        Ok(CallToolResult::structured(structured))
    }

    #[tool(
        name = "workflow_validate_json",
        annotations(read_only_hint = true),
        description = "Validate a workflow definition document and report every problem found."
    )]
    async fn workflow_validate_json(&self, param: Parameters<WorkflowValidateJsonRequest>) -> Result<CallToolResult, ErrorData> {
        let structured = validate_workflow_json(&param.0)?;
        Ok(CallToolResult::structured(structured))
    }
}

#[tool_handler]
impl ServerHandler for StepwiseServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            protocol_version: ProtocolVersion::LATEST,
            server_info: Implementation {
                name: "Stepwise".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Stepwise Workflow MCP".to_string()),
                ..Default::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }
}

/// Serves `server` over stdin/stdout until the client disconnects.
pub async fn serve_stdio(server: StepwiseServer) -> Result<()> {
    info!("starting MCP server on stdio");
    let service = server.serve(stdio()).await.context("failed to start MCP stdio server")?;
    service.waiting().await.context("MCP stdio server terminated abnormally")?;
    info!("MCP server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn info_advertises_tools() {
        let server = StepwiseServer::new(Arc::new(InMemoryStore::default()));
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());
        assert_eq!(info.server_info.name, "Stepwise");
        assert!(info.instructions.is_some_and(|text| text.contains("workflow_next")));
    }

    #[tokio::test]
    async fn list_tool_returns_structured_content() {
        let server = StepwiseServer::new(Arc::new(InMemoryStore::default()));
        let result = server.workflow_list().await.expect("list tool");
        assert_eq!(result.structured_content, Some(serde_json::json!({ "workflows": [] })));
    }
}
