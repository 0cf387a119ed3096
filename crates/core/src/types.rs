use std::fmt;

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Jobs are identified by time-ordered UUIDs.
pub type JobId = uuid::Uuid;

/// Opaque generation parameters (prompt, width, sampler, ...).
///
/// The engine never inspects the contents; it is forwarded verbatim to the
/// inference server.
pub type GenerationPayload = serde_json::Map<String, serde_json::Value>;

/// Identifier of the logical submission source (a UI tab) a job belongs to.
///
/// Unique per tab instance. A closed tab's id is never handed out again, so
/// late notifications for it can be dropped safely by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh id for a newly opened tab.
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
