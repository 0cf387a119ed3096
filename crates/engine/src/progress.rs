//! Status polling while a job is active.
//!
//! The submission call is the source of truth for completion; the poller
//! is purely observational. It samples the server's progress on a fixed
//! interval, forwards it to the job's owner when that owner is in view,
//! and gives up quietly after too many consecutive failures.

use std::sync::Arc;
use std::time::Duration;

use easel_core::progress::ProgressUpdate;
use easel_core::types::OwnerId;
use tokio_util::sync::CancellationToken;

use crate::backend::GenerationBackend;
use crate::config::EngineConfig;
use crate::delivery::OwnerNotifier;
use crate::error::JobError;
use crate::view::{in_view_or_open, InViewOracle};

/// Polling cadence and error tolerance.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub error_threshold: u32,
}

impl From<&EngineConfig> for PollSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            interval: config.poll_interval,
            timeout: config.poll_timeout,
            error_threshold: config.poll_error_threshold,
        }
    }
}

/// Why a poller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// The stop token fired (job finished or was cancelled).
    Stopped,
    /// Too many consecutive poll failures; the job itself keeps running.
    ErrorLimit,
}

/// Polls server status for one job at a time.
#[derive(Clone)]
pub struct ProgressPoller {
    backend: Arc<dyn GenerationBackend>,
    oracle: Arc<dyn InViewOracle>,
    notifier: OwnerNotifier,
    settings: PollSettings,
}

impl ProgressPoller {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        oracle: Arc<dyn InViewOracle>,
        notifier: OwnerNotifier,
        settings: PollSettings,
    ) -> Self {
        Self {
            backend,
            oracle,
            notifier,
            settings,
        }
    }

    /// Poll until `stop` fires or the error threshold is reached.
    ///
    /// Always delivers a final zeroed update to `owner` before returning.
    pub async fn run(self, owner: OwnerId, stop: CancellationToken) -> PollExit {
        let exit = self.poll_loop(&owner, &stop).await;
        self.notifier.progress(&owner, ProgressUpdate::ZERO);
        tracing::debug!(owner = %owner, ?exit, "Progress poller exited");
        exit
    }

    async fn poll_loop(&self, owner: &OwnerId, stop: &CancellationToken) -> PollExit {
        let mut consecutive_errors = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return PollExit::Stopped,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }

            let polled = tokio::select! {
                biased;
                _ = stop.cancelled() => return PollExit::Stopped,
                result = tokio::time::timeout(self.settings.timeout, self.backend.poll_status(stop)) => {
                    result.unwrap_or_else(|_| Err(JobError::Transport("status poll timed out".into())))
                }
            };

            match polled {
                Ok(status) => {
                    consecutive_errors = 0;
                    let update = if in_view_or_open(self.oracle.as_ref(), owner) {
                        ProgressUpdate::new(status.progress_fraction, status.eta_secs)
                    } else {
                        ProgressUpdate::ZERO
                    };
                    self.notifier.progress(owner, update);
                }
                Err(JobError::Cancelled) => return PollExit::Stopped,
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::debug!(
                        owner = %owner,
                        consecutive_errors,
                        error = %e,
                        "Progress poll failed",
                    );
                    if consecutive_errors >= self.settings.error_threshold {
                        tracing::warn!(
                            owner = %owner,
                            consecutive_errors,
                            "Giving up on progress polling; generation continues",
                        );
                        return PollExit::ErrorLimit;
                    }
                }
            }
        }
    }
}
