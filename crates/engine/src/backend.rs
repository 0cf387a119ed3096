//! The engine's view of the inference server.
//!
//! [`GenerationBackend`] is the seam between the job engine and the HTTP
//! client: the runner submits through it and the poller reads status
//! through it. [`SdApi`] is the production implementation; tests plug in
//! scripted fakes.

use async_trait::async_trait;
use easel_core::types::GenerationPayload;
use easel_sdapi::api::{GenerationResult, SdApi};
use tokio_util::sync::CancellationToken;

use crate::error::JobError;

/// Images and metadata produced by one submission.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    /// Encoded image files (PNG), in server order.
    pub images: Vec<Vec<u8>>,
    /// Server-provided generation info.
    pub info: String,
}

impl From<GenerationResult> for GenerationOutput {
    fn from(result: GenerationResult) -> Self {
        Self {
            images: result.images,
            info: result.info,
        }
    }
}

/// One status sample from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub progress_fraction: f64,
    pub eta_secs: f64,
    /// Free-form server state text, if any.
    pub state_info: Option<String>,
}

/// Submission and status boundary of the inference server.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Run one generation. Long-running; must return
    /// [`JobError::Cancelled`] promptly once `cancel` fires.
    async fn submit(
        &self,
        payload: &GenerationPayload,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, JobError>;

    /// Read the server's current progress.
    async fn poll_status(&self, cancel: &CancellationToken) -> Result<StatusSnapshot, JobError>;
}

#[async_trait]
impl GenerationBackend for SdApi {
    async fn submit(
        &self,
        payload: &GenerationPayload,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, JobError> {
        Ok(self.txt2img(payload, cancel).await?.into())
    }

    async fn poll_status(&self, cancel: &CancellationToken) -> Result<StatusSnapshot, JobError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(JobError::Cancelled),
            result = self.progress() => result?,
        };

        let state_info = response.textinfo.or_else(|| {
            (response.state.sampling_steps > 0).then(|| {
                format!(
                    "step {}/{}",
                    response.state.sampling_step, response.state.sampling_steps
                )
            })
        });

        Ok(StatusSnapshot {
            progress_fraction: response.progress,
            eta_secs: response.eta_relative,
            state_info,
        })
    }
}
