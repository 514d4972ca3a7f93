//! Image tool handlers for the MCP image relay.
//!
//! This module provides the `ImageHandler` struct and the argument/result types
//! shared by both transports. Each handler validates its arguments, runs one
//! prediction, downloads the resulting image into the matching output
//! directory and reports the local path.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use replicate_mcp_common::config::{Config, ImageInputEncoding};
use replicate_mcp_common::error::Error;
use replicate_mcp_common::replicate::{OutputError, PredictionInput, ReplicateClient};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// File name prefix of generated images.
pub const GENERATED_PREFIX: &str = "generated_";

/// File name prefix of modified images.
pub const MODIFIED_PREFIX: &str = "modified_";

/// Message returned when `generate_image` succeeds.
pub const GENERATE_SUCCESS_MESSAGE: &str = "Image generated successfully.";

/// Message returned when `modify_image` succeeds.
pub const MODIFY_SUCCESS_MESSAGE: &str = "Image modified successfully.";

/// Arguments accepted by the image tools.
///
/// Every field is optional on the wire so that a missing value is reported by
/// the tool itself rather than rejected as a malformed request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ToolArguments {
    /// Text prompt describing the image to generate or the change to apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Name of an image in the input directory (required by modify_image).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_filename: Option<String>,
}

impl ToolArguments {
    /// Arguments carrying only a prompt.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            image_filename: None,
        }
    }

    /// Arguments carrying a prompt and an input file name.
    pub fn prompt_and_image(prompt: impl Into<String>, image_filename: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            image_filename: Some(image_filename.into()),
        }
    }

    /// Read arguments from an untyped JSON value.
    ///
    /// Fields that are missing or not strings are left unset, so a wrongly
    /// typed value is reported by the tool as a missing parameter.
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            prompt: field("prompt"),
            image_filename: field("image_filename"),
        }
    }
}

/// Outcome of a tool invocation as returned to the caller.
///
/// Serialized untagged: `{"message", "file"}` on success, `{"error"}` on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResult {
    /// The image was written to `file`.
    Success {
        /// Human-readable summary
        message: String,
        /// Absolute path of the downloaded image
        file: String,
    },
    /// The tool could not complete.
    Failure {
        /// Human-readable reason
        error: String,
    },
}

impl ToolResult {
    /// Build a success result for a written file.
    pub fn success(message: impl Into<String>, file: &Path) -> Self {
        ToolResult::Success {
            message: message.into(),
            file: file.to_string_lossy().into_owned(),
        }
    }

    /// Build a failure result.
    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult::Failure {
            error: error.into(),
        }
    }

    /// Whether this is a failure result.
    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Failure { .. })
    }
}

/// Reasons a tool invocation fails. The `Display` text is what the caller sees.
#[derive(Debug, Error)]
pub enum ToolError {
    /// `generate_image` without a prompt
    #[error("Missing prompt parameter.")]
    MissingPrompt,

    /// `modify_image` without a prompt or file name
    #[error("Missing required parameters (prompt, image_filename).")]
    MissingParameters,

    /// The named input file is not in the input directory
    #[error("Specified image file does not exist.")]
    InputNotFound,

    /// The prediction output did not contain an image URL
    #[error(transparent)]
    Output(#[from] OutputError),

    /// The prediction call failed
    #[error(transparent)]
    Upstream(#[from] Error),

    /// The image could not be fetched or written
    #[error("Failed to download image from {url}: {message}")]
    Download { url: String, message: String },

    /// The input image could not be read
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Handler for the image tools.
///
/// Shared between concurrent requests; the only mutable state is the
/// timestamp counter used to name output files.
pub struct ImageHandler {
    /// Application configuration.
    config: Config,
    /// Client for the predictions API.
    client: ReplicateClient,
    /// Unauthenticated HTTP client for image downloads.
    download: reqwest::Client,
    /// Last timestamp handed out for a file name.
    last_timestamp: AtomicU64,
}

impl ImageHandler {
    /// Create a new ImageHandler with the given configuration.
    ///
    /// The configuration's directories should already exist (see
    /// `ImageDirectories::ensure`).
    pub fn new(config: Config) -> Self {
        debug!("Initializing ImageHandler");
        let client = ReplicateClient::new(&config);
        Self {
            config,
            client,
            download: reqwest::Client::new(),
            last_timestamp: AtomicU64::new(0),
        }
    }

    /// The configuration this handler was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Generate an image from a text prompt.
    #[instrument(level = "info", name = "generate_image", skip_all)]
    pub async fn generate_image(&self, args: ToolArguments) -> ToolResult {
        match self.try_generate(args).await {
            Ok(path) => {
                info!(file = %path.display(), "Image generated");
                ToolResult::success(GENERATE_SUCCESS_MESSAGE, &path)
            }
            Err(e) => {
                warn!(error = %e, "Image generation failed");
                ToolResult::failure(e.to_string())
            }
        }
    }

    /// Modify an image from the input directory using a text prompt.
    #[instrument(level = "info", name = "modify_image", skip_all)]
    pub async fn modify_image(&self, args: ToolArguments) -> ToolResult {
        match self.try_modify(args).await {
            Ok(path) => {
                info!(file = %path.display(), "Image modified");
                ToolResult::success(MODIFY_SUCCESS_MESSAGE, &path)
            }
            Err(e) => {
                warn!(error = %e, "Image modification failed");
                ToolResult::failure(e.to_string())
            }
        }
    }

    async fn try_generate(&self, args: ToolArguments) -> Result<PathBuf, ToolError> {
        let prompt = non_empty(args.prompt).ok_or(ToolError::MissingPrompt)?;
        info!(prompt = %prompt, "Generating image with prompt");

        let prediction = self
            .client
            .create_prediction(&self.config.generate_model, &PredictionInput::prompt(prompt))
            .await?;
        let url = prediction.image_url()?;
        debug!(url, "Extracted image URL");

        let filename = generated_filename(self.next_timestamp(), &self.config.output_extension);
        let dest = self.config.directories.generated.join(filename);
        self.download_image(url, &dest).await?;
        Ok(dest)
    }

    async fn try_modify(&self, args: ToolArguments) -> Result<PathBuf, ToolError> {
        let (prompt, image_filename) =
            match (non_empty(args.prompt), non_empty(args.image_filename)) {
                (Some(prompt), Some(image_filename)) => (prompt, image_filename),
                _ => return Err(ToolError::MissingParameters),
            };

        let source = self.resolve_input(&image_filename).await?;
        info!(prompt = %prompt, source = %source.display(), "Modifying image with prompt");

        let image = self.image_reference(&source).await?;
        let prediction = self
            .client
            .create_prediction(
                &self.config.modify_model,
                &PredictionInput::with_image(prompt, image),
            )
            .await?;
        let url = prediction.image_url()?;
        debug!(url, "Extracted image URL");

        let filename = modified_filename(self.next_timestamp(), &image_filename);
        let dest = self.config.directories.modified.join(filename);
        self.download_image(url, &dest).await?;
        Ok(dest)
    }

    /// Locate `image_filename` inside the input directory.
    async fn resolve_input(&self, image_filename: &str) -> Result<PathBuf, ToolError> {
        if !is_plain_filename(image_filename) {
            return Err(ToolError::InputNotFound);
        }
        let path = self.config.directories.input.join(image_filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(ToolError::InputNotFound),
        }
    }

    /// Reference to the input image in the form configured for the upstream API.
    async fn image_reference(&self, source: &Path) -> Result<String, ToolError> {
        match self.config.image_input_encoding {
            ImageInputEncoding::Path => Ok(source.to_string_lossy().into_owned()),
            ImageInputEncoding::DataUri => {
                let data = tokio::fs::read(source).await.map_err(|e| ToolError::Read {
                    path: source.to_path_buf(),
                    source: e,
                })?;
                Ok(format!(
                    "data:{};base64,{}",
                    mime_type_for(source),
                    BASE64.encode(&data)
                ))
            }
        }
    }

    /// Fetch `url` and write the body to `dest`.
    ///
    /// The file is only written once the whole body has been received.
    async fn download_image(&self, url: &str, dest: &Path) -> Result<(), ToolError> {
        let fail = |message: String| ToolError::Download {
            url: url.to_string(),
            message,
        };

        debug!(url, dest = %dest.display(), "Downloading image");
        let response = self
            .download
            .get(url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status.as_u16())));
        }

        let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;

        if let Err(e) = tokio::fs::write(dest, &bytes).await {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(fail(e.to_string()));
        }

        info!(url, file = %dest.display(), bytes = bytes.len(), "Image saved");
        Ok(())
    }

    /// Millisecond timestamp for a file name, strictly increasing per handler.
    fn next_timestamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut last = self.last_timestamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_timestamp.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `generated_<timestamp>.<extension>`
pub fn generated_filename(timestamp: u64, extension: &str) -> String {
    format!("{}{}.{}", GENERATED_PREFIX, timestamp, extension)
}

/// `modified_<timestamp>_<original>`
pub fn modified_filename(timestamp: u64, original: &str) -> String {
    format!("{}{}_{}", MODIFIED_PREFIX, timestamp, original)
}

/// True when `name` is a single ordinary path component (no separators, no `..`).
pub fn is_plain_filename(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// MIME type guessed from the file extension.
fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
