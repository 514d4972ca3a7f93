//! Replicate MCP Common Library
//!
//! Shared configuration, error handling, tracing, transport selection and the
//! Replicate predictions client used by the MCP image relay.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod error;
pub mod replicate;
pub mod server;
pub mod tracing;
pub mod transport;


pub use config::{Config, ImageDirectories, ImageInputEncoding};
pub use error::{ConfigError, Error, Result};
pub use replicate::{OutputError, PredictionInput, PredictionResponse, ReplicateClient};
pub use server::{McpServerBuilder, ServerError, shutdown_channel};
pub use transport::{Transport, TransportArgs, TransportMode};
