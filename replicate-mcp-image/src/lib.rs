//! Replicate MCP Image Relay Library
//!
//! This library relays `generate_image` and `modify_image` tool calls to the
//! Replicate predictions API and stores the resulting images locally.

pub mod handler;
pub mod relay;
pub mod server;
pub mod tools;

pub use handler::{ImageHandler, ToolArguments, ToolError, ToolResult};
pub use relay::router;
pub use server::ImageServer;
pub use tools::{DispatchError, Tool, ToolRequest, dispatch};
