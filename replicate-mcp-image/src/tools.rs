//! Tool table and dispatcher.
//!
//! The set of tools is closed: `Tool` enumerates them and `TOOLS` maps each one
//! to its description and handler function. Both transports dispatch through
//! [`dispatch`], which runs the handler in its own task so that a panic in one
//! request is reported as an error instead of taking anything else down.

use crate::handler::{ImageHandler, ToolArguments, ToolResult};
use replicate_mcp_common::tracing::panic_message;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Tools served by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Text-to-image generation
    GenerateImage,
    /// Prompt-guided modification of an input image
    ModifyImage,
}

impl Tool {
    /// Wire name of the tool.
    pub fn name(self) -> &'static str {
        match self {
            Tool::GenerateImage => "generate_image",
            Tool::ModifyImage => "modify_image",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Boxed future returned by a tool function.
pub type ToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;

/// Signature shared by every tool function.
pub type ToolFn = fn(Arc<ImageHandler>, ToolArguments) -> ToolFuture;

/// One row of the tool table.
pub struct ToolSpec {
    pub tool: Tool,
    /// Shown to MCP clients in `tools/list`
    pub description: &'static str,
    pub run: ToolFn,
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("tool", &self.tool)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Every tool the relay serves.
pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        tool: Tool::GenerateImage,
        description: "Generate an image from a text prompt. Requires `prompt`. \
                      The image is downloaded into the generated-images directory \
                      and its absolute path is returned in `file`.",
        run: run_generate_image,
    },
    ToolSpec {
        tool: Tool::ModifyImage,
        description: "Modify an image from the input directory using a text prompt. \
                      Requires `prompt` and `image_filename`. The result is downloaded \
                      into the modified-images directory and its absolute path is \
                      returned in `file`.",
        run: run_modify_image,
    },
];

fn run_generate_image(handler: Arc<ImageHandler>, args: ToolArguments) -> ToolFuture {
    Box::pin(async move { handler.generate_image(args).await })
}

fn run_modify_image(handler: Arc<ImageHandler>, args: ToolArguments) -> ToolFuture {
    Box::pin(async move { handler.modify_image(args).await })
}

/// Look up a tool by its wire name.
pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|spec| spec.tool.name() == name)
}

/// Envelope of a tool call: `{ "name": ..., "arguments": {...} }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolRequest {
    /// Tool wire name
    pub name: String,
    /// Tool arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<ToolArguments>,
}

impl ToolRequest {
    /// Build a request for `tool`.
    pub fn new(tool: Tool, arguments: ToolArguments) -> Self {
        Self {
            name: tool.name().to_string(),
            arguments: Some(arguments),
        }
    }

    /// Read an envelope from an untyped JSON body.
    ///
    /// Nothing here is rejected: a missing or non-string name surfaces as an
    /// unknown tool, and badly typed arguments as the tool's own parameter error.
    pub fn from_value(body: &Value) -> Self {
        Self {
            name: body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            arguments: body.get("arguments").map(ToolArguments::from_value),
        }
    }
}

/// Failures of the dispatcher itself, as opposed to tool-level errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No tool with the requested name
    #[error("Unknown tool requested.")]
    UnknownTool(String),

    /// The tool task panicked or was cancelled
    #[error("{0}")]
    Aborted(String),
}

/// Run the tool named in `request`.
///
/// Tool-level failures come back as `Ok(ToolResult::Failure { .. })`.
pub async fn dispatch(
    handler: Arc<ImageHandler>,
    request: ToolRequest,
) -> Result<ToolResult, DispatchError> {
    dispatch_with(TOOLS, handler, request).await
}

/// Run the tool named in `request` from the given table.
#[instrument(level = "info", name = "dispatch", skip_all, fields(tool = %request.name))]
pub async fn dispatch_with(
    tools: &'static [ToolSpec],
    handler: Arc<ImageHandler>,
    request: ToolRequest,
) -> Result<ToolResult, DispatchError> {
    let Some(spec) = tools.iter().find(|spec| spec.tool.name() == request.name) else {
        warn!("Unknown tool requested");
        return Err(DispatchError::UnknownTool(request.name));
    };

    info!("Processing {} request", spec.tool);
    let arguments = request.arguments.unwrap_or_default();
    supervise((spec.run)(handler, arguments)).await
}

/// Run a tool future on its own task and turn a panic into `DispatchError::Aborted`.
pub async fn supervise<F>(task: F) -> Result<ToolResult, DispatchError>
where
    F: Future<Output = ToolResult> + Send + 'static,
{
    match tokio::spawn(task).await {
        Ok(result) => Ok(result),
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic().as_ref());
            error!(panic = %message, "Tool task panicked");
            Err(DispatchError::Aborted(message))
        }
        Err(e) => {
            error!(error = %e, "Tool task did not complete");
            Err(DispatchError::Aborted(e.to_string()))
        }
    }
}
