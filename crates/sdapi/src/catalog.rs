//! Cached name lists served by the inference server.
//!
//! The UI needs the checkpoint, sampler, scheduler and upscaler names in
//! many places at once (every open tab populates its dropdowns on start).
//! [`ModelCatalog`] keeps one [`SingleFlightCache`] per [`ListKind`] so
//! those bursts turn into a single request each. When the server cannot
//! be reached a built-in fallback list is returned instead, without being
//! cached, so the next lookup tries the server again.

use std::fmt;
use std::sync::Arc;

use easel_core::single_flight::{SingleFlightCache, SingleFlightError};

use crate::api::{SdApi, SdApiError};

/// Samplers every supported server version ships with.
const FALLBACK_SAMPLERS: &[&str] = &[
    "DPM++ 2M",
    "DPM++ SDE",
    "DPM++ 2M SDE",
    "Euler a",
    "Euler",
    "LMS",
    "Heun",
    "DDIM",
];

const FALLBACK_SCHEDULERS: &[&str] = &[
    "Automatic",
    "Uniform",
    "Karras",
    "Exponential",
    "SGM Uniform",
];

const FALLBACK_UPSCALERS: &[&str] = &["None", "Lanczos", "Nearest"];

/// The kinds of name lists the catalog serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Checkpoints,
    Samplers,
    Schedulers,
    Upscalers,
}

impl ListKind {
    pub const ALL: [ListKind; 4] = [
        ListKind::Checkpoints,
        ListKind::Samplers,
        ListKind::Schedulers,
        ListKind::Upscalers,
    ];

    /// Names used when the server is unreachable.
    ///
    /// There is no sensible default checkpoint, so that list is empty.
    pub fn fallback(self) -> Vec<String> {
        let names: &[&str] = match self {
            ListKind::Checkpoints => &[],
            ListKind::Samplers => FALLBACK_SAMPLERS,
            ListKind::Schedulers => FALLBACK_SCHEDULERS,
            ListKind::Upscalers => FALLBACK_UPSCALERS,
        };
        names.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListKind::Checkpoints => "checkpoints",
            ListKind::Samplers => "samplers",
            ListKind::Schedulers => "schedulers",
            ListKind::Upscalers => "upscalers",
        };
        f.write_str(name)
    }
}

type NameCache = SingleFlightCache<Vec<String>, SdApiError>;

/// Coalescing cache of server-provided name lists.
///
/// Construct once at startup and share by `Arc`.
pub struct ModelCatalog {
    checkpoints: NameCache,
    samplers: NameCache,
    schedulers: NameCache,
    upscalers: NameCache,
}

impl ModelCatalog {
    /// Build a catalog backed by the given API client.
    pub fn new(api: Arc<SdApi>) -> Self {
        Self {
            checkpoints: fetcher(&api, |api| async move {
                api.list_models()
                    .await
                    .map(|models| models.into_iter().map(|m| m.title).collect::<Vec<_>>())
            }),
            samplers: fetcher(&api, |api| async move {
                api.list_samplers()
                    .await
                    .map(|samplers| samplers.into_iter().map(|s| s.name).collect::<Vec<_>>())
            }),
            schedulers: fetcher(&api, |api| async move {
                api.list_schedulers().await.map(|schedulers| {
                    schedulers
                        .into_iter()
                        .map(|s| if s.label.is_empty() { s.name } else { s.label })
                        .collect::<Vec<_>>()
                })
            }),
            upscalers: fetcher(&api, |api| async move {
                api.list_upscalers()
                    .await
                    .map(|upscalers| upscalers.into_iter().map(|u| u.name).collect::<Vec<_>>())
            }),
        }
    }

    /// Build a catalog from arbitrary producers, one per kind.
    ///
    /// Used by tests and by callers that source names elsewhere.
    pub fn from_caches(
        checkpoints: NameCache,
        samplers: NameCache,
        schedulers: NameCache,
        upscalers: NameCache,
    ) -> Self {
        Self {
            checkpoints,
            samplers,
            schedulers,
            upscalers,
        }
    }

    /// Names of the given kind, fetched at most once per cache lifetime.
    ///
    /// Falls back to [`ListKind::fallback`] if the fetch fails.
    pub async fn names(&self, kind: ListKind) -> Vec<String> {
        match self.try_names(kind).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Using fallback list");
                kind.fallback()
            }
        }
    }

    /// Names of the given kind, surfacing fetch errors to the caller.
    pub async fn try_names(
        &self,
        kind: ListKind,
    ) -> Result<Vec<String>, SingleFlightError<SdApiError>> {
        self.cache(kind).get().await
    }

    /// Drop the cached list and fetch it again.
    pub async fn refresh(&self, kind: ListKind) -> Vec<String> {
        self.cache(kind).reset();
        self.names(kind).await
    }

    /// Install a list known by other means (e.g. after the user adds a model).
    pub fn set_names(&self, kind: ListKind, names: Vec<String>) {
        self.cache(kind).update(names);
    }

    /// The cached list, if one has been fetched, without suspending.
    pub fn cached(&self, kind: ListKind) -> Option<Vec<String>> {
        self.cache(kind).peek_if_ready()
    }

    /// Forget every cached list (used when the server URL changes).
    pub fn reset_all(&self) {
        for kind in ListKind::ALL {
            self.cache(kind).reset();
        }
    }

    fn cache(&self, kind: ListKind) -> &NameCache {
        match kind {
            ListKind::Checkpoints => &self.checkpoints,
            ListKind::Samplers => &self.samplers,
            ListKind::Schedulers => &self.schedulers,
            ListKind::Upscalers => &self.upscalers,
        }
    }
}

fn fetcher<F, Fut>(api: &Arc<SdApi>, fetch: F) -> NameCache
where
    F: Fn(Arc<SdApi>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Vec<String>, SdApiError>> + Send + 'static,
{
    let api = Arc::clone(api);
    SingleFlightCache::new(move || fetch(Arc::clone(&api)))
}
