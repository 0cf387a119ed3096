use easel_sdapi::api::SdApiError;

/// Why a job (or one of its status polls) did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Network failure or timeout. Retried only by the progress poller.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The job's cancellation token fired. Not a failure.
    #[error("Cancelled")]
    Cancelled,

    /// The server rejected the request or answered with garbage.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Generated images could not be written to disk.
    #[error("Failed to store results: {0}")]
    Storage(#[from] std::io::Error),
}

/// Why a job could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The engine has shut down; nothing would ever run the job.
    #[error("Generation service is shut down")]
    Closed,
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<SdApiError> for JobError {
    fn from(e: SdApiError) -> Self {
        match e {
            SdApiError::Transport(msg) => Self::Transport(msg),
            SdApiError::Timeout => Self::Transport("request timed out".into()),
            SdApiError::Cancelled => Self::Cancelled,
            e @ (SdApiError::Api { .. } | SdApiError::Malformed(_)) => Self::Backend(e.to_string()),
        }
    }
}
