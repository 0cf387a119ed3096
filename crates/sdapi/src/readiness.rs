//! Exponential-backoff wait for the inference server to come up.
//!
//! The desktop client usually starts alongside the server, which takes a
//! while to load its first checkpoint. [`wait_until_ready`] keeps probing
//! with increasing delays until the server answers, the deadline passes,
//! or the [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::SdApi;

/// How patiently to wait for the server at startup.
pub struct ReadinessConfig {
    /// Pause after the first failed ping.
    pub first_retry: Duration,
    /// Longest pause between two pings.
    pub retry_cap: Duration,
    /// Each pause is the previous one times this factor.
    pub growth: f64,
    /// Total time budget for the whole wait.
    pub deadline: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            first_retry: Duration::from_secs(1),
            retry_cap: Duration::from_secs(30),
            growth: 2.0,
            deadline: Duration::from_secs(60),
        }
    }
}

impl ReadinessConfig {
    /// Pauses between consecutive pings: `first_retry`, then growing by
    /// `growth` until they reach `retry_cap`. Never ends.
    pub fn retry_delays(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.first_retry.min(self.retry_cap)), move |prev| {
            let grown = prev.mul_f64(self.growth.max(1.0));
            Some(grown.min(self.retry_cap))
        })
    }
}

/// Ping the server until it responds.
///
/// Returns `true` once a ping succeeds, `false` on cancellation or when
/// the deadline passes first.
pub async fn wait_until_ready(
    api: &SdApi,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> bool {
    let deadline = tokio::time::Instant::now() + config.deadline;
    let mut delays = config.retry_delays();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let delay = delays.next().unwrap_or(config.retry_cap);

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Readiness wait cancelled");
                return false;
            }
            result = api.ping() => {
                match result {
                    Ok(()) => {
                        tracing::info!(url = api.base_url(), attempt, "Inference server is ready");
                        return true;
                    }
                    Err(e) => {
                        tracing::warn!(
                            url = api.base_url(),
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Readiness ping {attempt} failed",
                        );
                    }
                }
            }
        }

        if tokio::time::Instant::now() + delay > deadline {
            tracing::error!(
                url = api.base_url(),
                attempts = attempt,
                "Inference server did not become ready in time",
            );
            return false;
        }

        // Wait before the next ping, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
