//! Replicate MCP Image Relay
//!
//! Serves image generation and modification through the Replicate API, either
//! as an HTTP relay on `POST /mcp` or as an MCP server over stdio.

use anyhow::Result;
use clap::Parser;
use replicate_mcp_common::tracing::{init_tracing, install_panic_hook};
use replicate_mcp_common::{Config, McpServerBuilder, TransportArgs};
use replicate_mcp_image::{ImageHandler, ImageServer, router};
use std::sync::Arc;

/// Command-line arguments for the image relay.
#[derive(Parser, Debug)]
#[command(name = "replicate-mcp-image")]
#[command(about = "MCP relay for image generation using the Replicate API")]
struct Args {
    /// Transport configuration
    #[command(flatten)]
    transport: TransportArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    install_panic_hook();

    tracing::info!("replicate-mcp-image server starting...");

    let args = Args::parse();

    // Load configuration and prepare the image directories
    let mut config = Config::from_env()?;
    config.directories = config.directories.ensure()?;
    tracing::info!(
        api_base_url = %config.api_base_url,
        generate_model = %config.generate_model,
        modify_model = %config.modify_model,
        input_dir = %config.directories.input.display(),
        "Configuration loaded"
    );

    let transport = args.transport.into_transport(config.port);
    let handler = Arc::new(ImageHandler::new(config));
    let server = ImageServer::new(handler.clone());

    tracing::info!(transport = %transport, "Starting MCP server");

    McpServerBuilder::new(server)
        .with_http_router(router(handler))
        .with_transport(transport)
        .run()
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
