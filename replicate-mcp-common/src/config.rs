//! Configuration module for loading environment variables and settings.

use crate::error::{ConfigError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable holding the Replicate API token.
pub const API_TOKEN_VAR: &str = "REPLICATE_API_TOKEN";

/// Default HTTP listening port.
pub const DEFAULT_PORT: u16 = 4000;

/// Default base URL of the hosted prediction API.
pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";

/// Default model used for text-to-image generation.
pub const DEFAULT_GENERATE_MODEL: &str = "black-forest-labs/flux-schnell";

/// Default model used for prompt-guided image modification.
pub const DEFAULT_MODIFY_MODEL: &str = "black-forest-labs/flux-dev";

/// Default extension for generated images (the generation model returns webp).
pub const DEFAULT_OUTPUT_EXTENSION: &str = "webp";

/// Directory holding caller-supplied input images.
pub const INPUT_DIR_NAME: &str = "images";

/// Directory receiving modified images.
pub const MODIFIED_DIR_NAME: &str = "modified_images";

/// Directory receiving images generated from a prompt.
pub const GENERATED_DIR_NAME: &str = "images-from-prompt";

/// How a local input image is referenced in the upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageInputEncoding {
    /// Send the absolute local path.
    #[default]
    Path,
    /// Send the file contents as a base64 `data:` URI.
    DataUri,
}

impl FromStr for ImageInputEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "path" => Ok(ImageInputEncoding::Path),
            "data_uri" | "data-uri" => Ok(ImageInputEncoding::DataUri),
            other => Err(format!(
                "unknown image input encoding '{}'. Valid options: path, data_uri",
                other
            )),
        }
    }
}

impl fmt::Display for ImageInputEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageInputEncoding::Path => write!(f, "path"),
            ImageInputEncoding::DataUri => write!(f, "data_uri"),
        }
    }
}

/// The three flat image folders used by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDirectories {
    /// Caller-supplied input images
    pub input: PathBuf,
    /// Outputs of the modification tool
    pub modified: PathBuf,
    /// Outputs of the generation tool
    pub generated: PathBuf,
}

impl ImageDirectories {
    /// Lay out the standard folder names under `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            input: root.join(INPUT_DIR_NAME),
            modified: root.join(MODIFIED_DIR_NAME),
            generated: root.join(GENERATED_DIR_NAME),
        }
    }

    /// Create every directory (recursively) if missing and return the layout
    /// with absolute paths.
    ///
    /// # Errors
    /// Returns `Error::Io` if a directory cannot be created or the current
    /// directory cannot be determined.
    pub fn ensure(&self) -> Result<Self> {
        fn prepare(dir: &Path) -> std::io::Result<PathBuf> {
            std::fs::create_dir_all(dir)?;
            std::path::absolute(dir)
        }

        Ok(Self {
            input: prepare(&self.input)?,
            modified: prepare(&self.modified)?,
            generated: prepare(&self.generated)?,
        })
    }
}

/// Application configuration loaded from environment variables.
///
/// Built once at process entry and handed to the client and handlers.
#[derive(Clone)]
pub struct Config {
    /// Replicate API token (required)
    pub api_token: String,
    /// Base URL of the prediction API
    pub api_base_url: String,
    /// HTTP server port
    pub port: u16,
    /// Model path used by `generate_image`
    pub generate_model: String,
    /// Model path used by `modify_image`
    pub modify_model: String,
    /// Image folders
    pub directories: ImageDirectories,
    /// Extension (without the dot) of generated image files
    pub output_extension: String,
    /// How input images are referenced upstream
    pub image_input_encoding: ImageInputEncoding,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_token", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("port", &self.port)
            .field("generate_model", &self.generate_model)
            .field("modify_model", &self.modify_model)
            .field("directories", &self.directories)
            .field("output_extension", &self.output_extension)
            .field("image_input_encoding", &self.image_input_encoding)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables and .env file.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingEnvVar` if REPLICATE_API_TOKEN is not set,
    /// or `ConfigError::InvalidValue` if an optional variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    ///
    /// `from_env` delegates here; tests pass a map instead of touching the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_token = var(API_TOKEN_VAR).ok_or_else(|| ConfigError::missing_env_var(API_TOKEN_VAR))?;

        let api_base_url = var("REPLICATE_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid_value("PORT", format!("'{}': {}", raw, e)))?,
            None => DEFAULT_PORT,
        };

        let generate_model =
            var("REPLICATE_GENERATE_MODEL").unwrap_or_else(|| DEFAULT_GENERATE_MODEL.to_string());
        let modify_model =
            var("REPLICATE_MODIFY_MODEL").unwrap_or_else(|| DEFAULT_MODIFY_MODEL.to_string());

        let root = var("IMAGE_ROOT_DIR").unwrap_or_else(|| ".".to_string());
        let directories = ImageDirectories::under(root);

        let output_extension = match var("GENERATED_IMAGE_EXTENSION") {
            Some(raw) => {
                let ext = raw.trim().trim_start_matches('.').to_string();
                if ext.is_empty() || ext.contains(['/', '\\']) {
                    return Err(ConfigError::invalid_value(
                        "GENERATED_IMAGE_EXTENSION",
                        format!("'{}' is not a file extension", raw),
                    ));
                }
                ext
            }
            None => DEFAULT_OUTPUT_EXTENSION.to_string(),
        };

        let image_input_encoding = match var("IMAGE_INPUT_ENCODING") {
            Some(raw) => raw
                .parse()
                .map_err(|e: String| ConfigError::invalid_value("IMAGE_INPUT_ENCODING", e))?,
            None => ImageInputEncoding::default(),
        };

        Ok(Self {
            api_token,
            api_base_url,
            port,
            generate_model,
            modify_model,
            directories,
            output_extension,
            image_input_encoding,
        })
    }
}
