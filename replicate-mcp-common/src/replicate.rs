//! Client for the Replicate predictions API.
//!
//! Every call is a single synchronous prediction: the request carries
//! `Prefer: wait`, so the upstream service blocks until the model has finished
//! and the response already holds the output. There is no retry, no backoff
//! and no timeout beyond the transport defaults.

use crate::config::Config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

/// Header value asking the API to hold the connection until the prediction completes.
pub const PREFER_WAIT: &str = "wait";

/// Model input payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionInput {
    /// Text prompt
    pub prompt: String,
    /// Reference to a conditioning image (local path or data URI)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl PredictionInput {
    /// Input for a prompt-only prediction.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
        }
    }

    /// Input for an image-conditioned prediction.
    pub fn with_image(prompt: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: Some(image.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct PredictionRequest<'a> {
    input: &'a PredictionInput,
}

/// Why a prediction's `output` could not be turned into an image URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OutputError {
    /// `output` was absent, null or empty
    #[error("No output received from the model.")]
    Missing,
    /// `output` had a shape other than a string or an array of strings
    #[error("Unexpected output format")]
    UnexpectedFormat,
}

/// Prediction object returned by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// Prediction identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Lifecycle status (`succeeded`, `failed`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Model output; a URL or a list of URLs for image models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error reported by the model run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl PredictionResponse {
    /// Extract the image URL from `output`.
    ///
    /// A string is used as is; for an array the first element is used.
    pub fn image_url(&self) -> Result<&str, OutputError> {
        match &self.output {
            None | Some(Value::Null) => Err(OutputError::Missing),
            Some(Value::String(url)) if url.is_empty() => Err(OutputError::Missing),
            Some(Value::String(url)) => Ok(url.as_str()),
            Some(Value::Array(items)) => match items.first() {
                Some(Value::String(url)) if !url.is_empty() => Ok(url.as_str()),
                _ => Err(OutputError::UnexpectedFormat),
            },
            Some(_) => Err(OutputError::UnexpectedFormat),
        }
    }

    /// The upstream error text if the prediction ended in `failed` or `canceled`.
    pub fn failure(&self) -> Option<String> {
        let status = self.status.as_deref()?;
        if status != "failed" && status != "canceled" {
            return None;
        }
        let detail = match &self.error {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Null) | None => "no error detail".to_string(),
            Some(other) => other.to_string(),
        };
        Some(format!("prediction {}: {}", status, detail))
    }
}

/// Authenticated client for the predictions endpoint.
#[derive(Clone)]
pub struct ReplicateClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for ReplicateClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ReplicateClient {
    /// Create a client from the loaded configuration.
    pub fn new(config: &Config) -> Self {
        Self::with_base_url(config.api_token.clone(), config.api_base_url.clone())
    }

    /// Create a client against an explicit base URL.
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Endpoint for creating a prediction on `model` (`owner/name`).
    pub fn predictions_endpoint(&self, model: &str) -> String {
        format!("{}/models/{}/predictions", self.base_url, model)
    }

    /// Run one prediction and wait for its result.
    ///
    /// # Errors
    /// Returns `Error::Api` on transport failure, a non-2xx status, an
    /// undecodable body, or a prediction that finished as failed/canceled.
    #[instrument(level = "debug", skip(self, input), fields(model = %model))]
    pub async fn create_prediction(
        &self,
        model: &str,
        input: &PredictionInput,
    ) -> Result<PredictionResponse> {
        let endpoint = self.predictions_endpoint(model);
        debug!(endpoint = %endpoint, has_image = input.image.is_some(), "Calling predictions API");

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.token)
            .header("Content-Type", "application/json")
            .header("Prefer", PREFER_WAIT)
            .json(&PredictionRequest { input })
            .send()
            .await
            .map_err(|e| Error::api(&endpoint, 0, format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(&endpoint, status.as_u16(), body));
        }

        let prediction: PredictionResponse = response.json().await.map_err(|e| {
            Error::api(&endpoint, status.as_u16(), format!("Failed to parse response: {}", e))
        })?;

        if let Some(message) = prediction.failure() {
            return Err(Error::api(&endpoint, status.as_u16(), message));
        }

        debug!(id = ?prediction.id, status = ?prediction.status, "Prediction completed");
        Ok(prediction)
    }
}
