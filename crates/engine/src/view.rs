//! Which owner the presentation layer currently shows.
//!
//! Progress is only meaningful for the focused tab; every other owner gets
//! zeroed updates. The oracle is owned by the presentation layer and may
//! fail, in which case callers treat the owner as in view.

use std::sync::RwLock;

use easel_core::types::OwnerId;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("View state unavailable: {0}")]
    Unavailable(String),
}

/// Answers "is this owner the one on screen right now?".
pub trait InViewOracle: Send + Sync {
    fn is_in_view(&self, owner: &OwnerId) -> Result<bool, ViewError>;
}

/// Query the oracle, failing open on error.
pub fn in_view_or_open(oracle: &dyn InViewOracle, owner: &OwnerId) -> bool {
    match oracle.is_in_view(owner) {
        Ok(in_view) => in_view,
        Err(e) => {
            tracing::debug!(owner = %owner, error = %e, "In-view check failed, showing progress");
            true
        }
    }
}

/// Oracle for headless use: every owner is in view.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysInView;

impl InViewOracle for AlwaysInView {
    fn is_in_view(&self, _owner: &OwnerId) -> Result<bool, ViewError> {
        Ok(true)
    }
}

/// Focus state updated by the presentation layer on tab switches.
#[derive(Debug, Default)]
pub struct FocusTracker {
    focused: RwLock<Option<OwnerId>>,
}

impl FocusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `owner` as the visible tab.
    pub fn focus(&self, owner: OwnerId) {
        match self.focused.write() {
            Ok(mut focused) => *focused = Some(owner),
            Err(poisoned) => *poisoned.into_inner() = Some(owner),
        }
    }

    /// No tab is visible (e.g. the window is minimised).
    pub fn clear(&self) {
        match self.focused.write() {
            Ok(mut focused) => *focused = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn focused(&self) -> Option<OwnerId> {
        self.focused.read().ok().and_then(|f| f.clone())
    }
}

impl InViewOracle for FocusTracker {
    fn is_in_view(&self, owner: &OwnerId) -> Result<bool, ViewError> {
        let focused = self
            .focused
            .read()
            .map_err(|_| ViewError::Unavailable("focus state poisoned".into()))?;
        Ok(focused.as_ref() == Some(owner))
    }
}
