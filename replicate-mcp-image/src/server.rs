//! MCP Server implementation for the image relay.
//!
//! Exposes the same tools as the HTTP relay over the MCP protocol:
//! - `generate_image` for text-to-image generation
//! - `modify_image` for prompt-guided modification of an input image

use crate::handler::{ImageHandler, ToolArguments, ToolResult};
use crate::tools::{DispatchError, TOOLS, ToolRequest, dispatch, find_tool};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::info;

/// MCP Server for image generation and modification.
#[derive(Clone)]
pub struct ImageServer {
    /// Handler shared with the HTTP relay
    handler: Arc<ImageHandler>,
}

impl ImageServer {
    /// Create a new ImageServer around a shared handler.
    pub fn new(handler: Arc<ImageHandler>) -> Self {
        Self { handler }
    }

    /// Run a tool and convert its result to MCP content.
    pub async fn call(&self, request: ToolRequest) -> Result<CallToolResult, McpError> {
        let name = request.name.clone();
        let result = dispatch(self.handler.clone(), request)
            .await
            .map_err(|e| match e {
                DispatchError::UnknownTool(_) => {
                    McpError::invalid_params(format!("Unknown tool: {}", name), None)
                }
                DispatchError::Aborted(message) => McpError::internal_error(message, None),
            })?;

        let text = serde_json::to_string(&result).map_err(|e| {
            McpError::internal_error(format!("Failed to serialize result: {}", e), None)
        })?;

        Ok(match result {
            ToolResult::Success { .. } => CallToolResult::success(vec![Content::text(text)]),
            ToolResult::Failure { .. } => CallToolResult::error(vec![Content::text(text)]),
        })
    }
}

impl ServerHandler for ImageServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Image generation relay backed by the Replicate API. \
                 Use generate_image to create an image from a text prompt, \
                 and modify_image to change an image from the input directory. \
                 Both tools return the local path of the downloaded image."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _params: Option<rmcp::model::PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<rmcp::model::ListToolsResult, McpError>> + Send + '_ {
        async move {
            use rmcp::model::{ListToolsResult, Tool};
            use schemars::schema_for;

            let schema = schema_for!(ToolArguments);
            let schema_value = serde_json::to_value(&schema).unwrap_or_default();
            let input_schema = match schema_value {
                serde_json::Value::Object(map) => Arc::new(map),
                _ => Arc::new(serde_json::Map::new()),
            };

            let tools = TOOLS
                .iter()
                .map(|spec| Tool {
                    name: Cow::Borrowed(spec.tool.name()),
                    description: Some(Cow::Borrowed(spec.description)),
                    input_schema: input_schema.clone(),
                    annotations: None,
                    icons: None,
                    meta: None,
                    output_schema: None,
                    title: None,
                })
                .collect();

            Ok(ListToolsResult {
                tools,
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn call_tool(
        &self,
        params: rmcp::model::CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            info!(tool = %params.name, "MCP tool call");

            if find_tool(params.name.as_ref()).is_none() {
                return Err(McpError::invalid_params(
                    format!("Unknown tool: {}", params.name),
                    None,
                ));
            }

            let arguments = params
                .arguments
                .map(|args| ToolArguments::from_value(&serde_json::Value::Object(args)));

            self.call(ToolRequest {
                name: params.name.to_string(),
                arguments,
            })
            .await
        }
    }
}
