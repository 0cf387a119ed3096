use std::path::PathBuf;
use std::time::Duration;

use easel_core::env::{parse_env_or, require_nonzero, string_env_or};
use easel_core::error::CoreError;

const DEFAULT_TICK_INTERVAL_MS: u64 = 100;
const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_POLL_ERROR_THRESHOLD: u32 = 5;
const DEFAULT_OUTPUT_DIR: &str = "outputs";

/// Timing and storage settings for the job engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the scheduler tries to promote a pending job.
    pub tick_interval: Duration,
    /// Delay between progress polls while a job is active.
    pub poll_interval: Duration,
    /// Bound on a single progress poll.
    pub poll_timeout: Duration,
    /// Consecutive failed polls after which the poller gives up.
    pub poll_error_threshold: u32,
    /// Where generated images are written.
    pub output_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            poll_error_threshold: DEFAULT_POLL_ERROR_THRESHOLD,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default   |
    /// |------------------------------|-----------|
    /// | `EASEL_TICK_INTERVAL_MS`     | `100`     |
    /// | `EASEL_POLL_INTERVAL_MS`     | `200`     |
    /// | `EASEL_POLL_TIMEOUT_MS`      | `2000`    |
    /// | `EASEL_POLL_ERROR_THRESHOLD` | `5`       |
    /// | `EASEL_OUTPUT_DIR`           | `outputs` |
    pub fn from_env() -> Result<Self, CoreError> {
        let tick_ms = millis_env("EASEL_TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL_MS)?;
        let poll_ms = millis_env("EASEL_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let poll_timeout_ms = millis_env("EASEL_POLL_TIMEOUT_MS", DEFAULT_POLL_TIMEOUT_MS)?;

        let poll_error_threshold: u32 =
            parse_env_or("EASEL_POLL_ERROR_THRESHOLD", DEFAULT_POLL_ERROR_THRESHOLD)?;
        require_nonzero("EASEL_POLL_ERROR_THRESHOLD", u64::from(poll_error_threshold))?;

        Ok(Self {
            tick_interval: Duration::from_millis(tick_ms),
            poll_interval: Duration::from_millis(poll_ms),
            poll_timeout: Duration::from_millis(poll_timeout_ms),
            poll_error_threshold,
            output_dir: PathBuf::from(string_env_or("EASEL_OUTPUT_DIR", DEFAULT_OUTPUT_DIR)),
        })
    }
}

fn millis_env(key: &str, default: u64) -> Result<u64, CoreError> {
    require_nonzero(key, parse_env_or(key, default)?)
}
