//! `easel-worker` -- headless driver for the generation engine.
//!
//! Waits for the inference server, logs the model lists it offers, then
//! queues one job per payload file given on the command line and exits once
//! every job has reached a terminal state.
//!
//! ```text
//! easel-worker payloads/portrait.json payloads/landscape.json
//! ```
//!
//! # Environment variables
//!
//! | Variable                   | Default                 |
//! |----------------------------|-------------------------|
//! | `SD_API_URL`               | `http://127.0.0.1:7860` |
//! | `EASEL_READY_TIMEOUT_SECS` | `60`                    |
//!
//! plus the engine and client settings documented on `EngineConfig` and
//! `SdApiConfig`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use easel_core::env::parse_env_or;
use easel_core::types::{GenerationPayload, OwnerId};
use easel_engine::delivery::ChannelSink;
use easel_engine::view::AlwaysInView;
use easel_engine::{EngineConfig, GenerationService, OwnerEvent, OwnerNotifier};
use easel_sdapi::api::SdApi;
use easel_sdapi::catalog::{ListKind, ModelCatalog};
use easel_sdapi::config::SdApiConfig;
use easel_sdapi::readiness::{wait_until_ready, ReadinessConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_READY_TIMEOUT_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel_worker=debug,easel_engine=debug,easel_sdapi=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let api_config = SdApiConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;
    let ready_secs: u64 = parse_env_or("EASEL_READY_TIMEOUT_SECS", DEFAULT_READY_TIMEOUT_SECS)?;
    tracing::info!(
        base_url = %api_config.base_url,
        output_dir = %engine_config.output_dir.display(),
        "Loaded configuration",
    );

    // --- Payloads ---
    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        bail!("usage: easel-worker <payload.json> [payload.json ...]");
    }
    let mut payloads = Vec::with_capacity(files.len());
    for file in &files {
        payloads.push(read_payload(Path::new(file)).await?);
    }

    // --- Inference server ---
    let api = Arc::new(SdApi::new(&api_config));
    let shutdown = CancellationToken::new();
    let readiness = ReadinessConfig {
        deadline: Duration::from_secs(ready_secs),
        ..ReadinessConfig::default()
    };
    if !wait_until_ready(&api, &readiness, &shutdown).await {
        bail!("inference server at {} did not become ready", api.base_url());
    }

    let catalog = ModelCatalog::new(Arc::clone(&api));
    for kind in ListKind::ALL {
        let names = catalog.names(kind).await;
        tracing::info!(kind = %kind, count = names.len(), names = ?names, "Available");
    }

    // --- Engine ---
    let (sink, mut events) = ChannelSink::channel();
    let service = GenerationService::start(
        &engine_config,
        api,
        Arc::new(AlwaysInView),
        OwnerNotifier::inline(Arc::new(sink)),
    );

    for (file, payload) in files.iter().zip(payloads) {
        let ticket = service.enqueue(OwnerId::generate(), payload)?;
        tracing::info!(file = %file, job_id = %ticket.id, owner = %ticket.owner, "Queued");
    }

    let mut remaining = files.len();
    let mut failed = 0usize;
    while remaining > 0 {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, cancelling outstanding jobs");
                break;
            }
            event = events.recv() => {
                let Some((owner, event)) = event else { break };
                if event.is_terminal() {
                    remaining -= 1;
                }
                if matches!(event, OwnerEvent::Failed { .. }) {
                    failed += 1;
                }
                log_event(&owner, &event);
            }
        }
    }

    shutdown.cancel();
    service.shutdown().await;

    if failed > 0 {
        bail!("{failed} of {} jobs failed", files.len());
    }
    Ok(())
}

async fn read_payload(path: &Path) -> anyhow::Result<GenerationPayload> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("{} must contain a JSON object", path.display()),
    }
}

fn log_event(owner: &OwnerId, event: &OwnerEvent) {
    match event {
        OwnerEvent::Busy { busy } => tracing::debug!(owner = %owner, busy, "Busy changed"),
        OwnerEvent::Progress(update) if update.is_zero() => {}
        OwnerEvent::Progress(update) => tracing::info!(
            owner = %owner,
            percent = update.percent(),
            eta = %update.eta_text(),
            "Progress",
        ),
        OwnerEvent::Completed {
            job_id,
            paths,
            elapsed_secs,
            ..
        } => tracing::info!(
            owner = %owner,
            job_id = %job_id,
            paths = ?paths,
            elapsed_secs,
            "Completed",
        ),
        OwnerEvent::Cancelled { job_id } => {
            tracing::info!(owner = %owner, job_id = %job_id, "Cancelled")
        }
        OwnerEvent::Failed { job_id, error } => {
            tracing::error!(owner = %owner, job_id = %job_id, error = %error, "Failed")
        }
    }
}
