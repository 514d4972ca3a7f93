//! HTTP relay: a single `POST /mcp` endpoint.
//!
//! The body is a JSON [`ToolRequest`] envelope. Tool results, including
//! tool-level errors, are answered with 200; only an unknown tool or a body
//! that is not JSON (400) and an aborted tool task (500) change the status code.

use crate::handler::{ImageHandler, ToolResult};
use crate::tools::{DispatchError, TOOLS, ToolRequest, ToolSpec, dispatch_with};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Path of the tool endpoint.
pub const MCP_PATH: &str = "/mcp";

#[derive(Clone)]
struct RelayState {
    handler: Arc<ImageHandler>,
    tools: &'static [ToolSpec],
}

/// Build the relay router around a shared handler.
pub fn router(handler: Arc<ImageHandler>) -> Router {
    router_with_tools(handler, TOOLS)
}

fn router_with_tools(handler: Arc<ImageHandler>, tools: &'static [ToolSpec]) -> Router {
    Router::new()
        .route(MCP_PATH, post(handle_tool_call))
        .with_state(RelayState { handler, tools })
}

async fn handle_tool_call(
    State(state): State<RelayState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            warn!(reason = %rejection.body_text(), "Rejected request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", rejection.body_text()),
            );
        }
    };

    let request = ToolRequest::from_value(&body);
    info!(tool = %request.name, arguments = ?request.arguments, "Received request");

    match dispatch_with(state.tools, state.handler, request).await {
        Ok(result) => {
            info!(is_error = result.is_error(), "Response generated");
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}

fn status_for(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::UnknownTool(_) => StatusCode::BAD_REQUEST,
        DispatchError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ToolResult::failure(message))).into_response()
}
