use std::time::Duration;

use easel_core::env::{parse_env_or, require_nonzero, string_env_or};
use easel_core::error::CoreError;

/// Default base URL of a locally running inference server.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:7860";

/// Timeout for short calls (lists, progress, interrupt).
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Generation may legitimately take many minutes on slow hardware.
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 30 * 60;

/// Connection settings for the inference server.
#[derive(Debug, Clone)]
pub struct SdApiConfig {
    /// Base HTTP URL without a trailing slash, e.g. `http://127.0.0.1:7860`.
    pub base_url: String,
    /// Bound on list, status and interrupt requests.
    pub request_timeout: Duration,
    /// Bound on the txt2img submission call.
    pub generation_timeout: Duration,
}

impl Default for SdApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
        }
    }
}

impl SdApiConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                 |
    /// |------------------------------|-------------------------|
    /// | `SD_API_URL`                 | `http://127.0.0.1:7860` |
    /// | `SD_REQUEST_TIMEOUT_SECS`    | `10`                    |
    /// | `SD_GENERATION_TIMEOUT_SECS` | `1800`                  |
    pub fn from_env() -> Result<Self, CoreError> {
        let base_url = string_env_or("SD_API_URL", DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string();
        if base_url.is_empty() {
            return Err(CoreError::Validation("SD_API_URL must not be empty".into()));
        }

        let request_timeout_secs = require_nonzero(
            "SD_REQUEST_TIMEOUT_SECS",
            parse_env_or("SD_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
        )?;
        let generation_timeout_secs = require_nonzero(
            "SD_GENERATION_TIMEOUT_SECS",
            parse_env_or("SD_GENERATION_TIMEOUT_SECS", DEFAULT_GENERATION_TIMEOUT_SECS)?,
        )?;

        Ok(Self {
            base_url,
            request_timeout: Duration::from_secs(request_timeout_secs),
            generation_timeout: Duration::from_secs(generation_timeout_secs),
        })
    }
}
