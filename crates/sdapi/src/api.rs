//! REST API client for the inference server.
//!
//! Wraps the generation, progress, interrupt and list endpoints using
//! [`reqwest`]. Every request carries a bounded timeout: short for
//! lookups and status polls, long for the generation call itself.

use std::time::Duration;

use easel_core::types::GenerationPayload;
use tokio_util::sync::CancellationToken;

use crate::config::SdApiConfig;
use crate::messages::{
    decode_image, GenerationResponse, ProgressResponse, SamplerInfo, SchedulerInfo, SdModel,
    UpscalerInfo,
};

/// Timeout for the best-effort interrupt sent after a local cancellation.
const INTERRUPT_TIMEOUT: Duration = Duration::from_secs(3);

/// HTTP client for a single inference server.
#[derive(Clone)]
pub struct SdApi {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    generation_timeout: Duration,
}

/// Decoded output of a finished generation.
#[derive(Debug, Clone, Default)]
pub struct GenerationResult {
    /// Raw PNG bytes, in the order the server returned them.
    pub images: Vec<Vec<u8>>,
    /// Server-provided generation info (JSON text).
    pub info: String,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum SdApiError {
    /// The request could not be delivered (connection refused, DNS, reset).
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// The request exceeded its timeout.
    #[error("Request timed out")]
    Timeout,

    /// The server returned a non-2xx status code.
    #[error("Server API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The caller's cancellation token fired before the call finished.
    #[error("Request cancelled")]
    Cancelled,
}

impl SdApiError {
    /// Network-level failures that may succeed if simply tried again.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

impl From<reqwest::Error> for SdApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl SdApi {
    /// Create a new API client from connection settings.
    pub fn new(config: &SdApiConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: &SdApiConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            request_timeout: config.request_timeout,
            generation_timeout: config.generation_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a text-to-image generation.
    ///
    /// Sends `POST /sdapi/v1/txt2img` with the payload as the JSON body and
    /// waits for the finished images. If `cancel` fires first, the request
    /// is dropped, an interrupt is sent so the server stops sampling, and
    /// [`SdApiError::Cancelled`] is returned.
    pub async fn txt2img(
        &self,
        payload: &GenerationPayload,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, SdApiError> {
        let request = async {
            let response = self
                .client
                .post(self.url("/sdapi/v1/txt2img"))
                .timeout(self.generation_timeout)
                .json(payload)
                .send()
                .await?;
            Self::parse_response::<GenerationResponse>(response).await
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.interrupt_quietly().await;
                return Err(SdApiError::Cancelled);
            }
            result = request => result?,
        };

        let images = response
            .images
            .iter()
            .map(|encoded| decode_image(encoded))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SdApiError::Malformed(format!("invalid image data: {e}")))?;

        Ok(GenerationResult {
            images,
            info: response.info,
        })
    }

    /// Fetch the current generation progress.
    ///
    /// Sends `GET /sdapi/v1/progress`, skipping the live preview image to
    /// keep the response small.
    pub async fn progress(&self) -> Result<ProgressResponse, SdApiError> {
        self.get_json("/sdapi/v1/progress?skip_current_image=true")
            .await
    }

    /// Ask the server to stop whatever it is generating right now.
    pub async fn interrupt(&self) -> Result<(), SdApiError> {
        let response = self
            .client
            .post(self.url("/sdapi/v1/interrupt"))
            .timeout(self.request_timeout.min(INTERRUPT_TIMEOUT))
            .send()
            .await?;
        Self::check_status(response).await
    }

    /// Cheap liveness check.
    pub async fn ping(&self) -> Result<(), SdApiError> {
        self.progress().await.map(|_| ())
    }

    pub async fn list_models(&self) -> Result<Vec<SdModel>, SdApiError> {
        self.get_json("/sdapi/v1/sd-models").await
    }

    pub async fn list_samplers(&self) -> Result<Vec<SamplerInfo>, SdApiError> {
        self.get_json("/sdapi/v1/samplers").await
    }

    pub async fn list_schedulers(&self) -> Result<Vec<SchedulerInfo>, SdApiError> {
        self.get_json("/sdapi/v1/schedulers").await
    }

    pub async fn list_upscalers(&self) -> Result<Vec<UpscalerInfo>, SdApiError> {
        self.get_json("/sdapi/v1/upscalers").await
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SdApiError> {
        let response = self
            .client
            .get(self.url(path))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn interrupt_quietly(&self) {
        match self.interrupt().await {
            Ok(()) => tracing::debug!("Interrupt sent after cancellation"),
            Err(e) => tracing::debug!(error = %e, "Interrupt after cancellation failed"),
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`SdApiError::Api`] containing
    /// the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SdApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SdApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SdApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SdApiError::Malformed(e.to_string()))
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), SdApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
