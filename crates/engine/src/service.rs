//! The engine facade.
//!
//! [`GenerationService`] wires the queue, runner, poller and scheduler
//! together and spawns the scheduler loop. It is created once at startup
//! via [`GenerationService::start`]; the returned `Arc` is handed to every
//! component that submits or cancels work.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use easel_core::progress::ProgressUpdate;
use easel_core::types::{GenerationPayload, JobId, OwnerId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::GenerationBackend;
use crate::config::EngineConfig;
use crate::delivery::{OwnerEvent, OwnerNotifier};
use crate::error::EnqueueError;
use crate::progress::{PollSettings, ProgressPoller};
use crate::queue::{CancelSummary, JobQueue, JobTicket, QueueStatus};
use crate::runner::JobRunner;
use crate::scheduler::Scheduler;
use crate::store::ResultStore;
use crate::view::InViewOracle;

/// How long shutdown waits for the loop and the active job.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared entry point for submitting and cancelling generation jobs.
pub struct GenerationService {
    queue: Arc<JobQueue>,
    scheduler: Arc<Scheduler>,
    notifier: OwnerNotifier,
    /// Master cancellation token for the scheduler loop.
    cancel: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl GenerationService {
    /// Build the engine and spawn its scheduler loop.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        config: &EngineConfig,
        backend: Arc<dyn GenerationBackend>,
        oracle: Arc<dyn InViewOracle>,
        notifier: OwnerNotifier,
    ) -> Arc<Self> {
        let queue = Arc::new(JobQueue::new());
        let poller = ProgressPoller::new(
            Arc::clone(&backend),
            oracle,
            notifier.clone(),
            PollSettings::from(config),
        );
        let runner = Arc::new(JobRunner::new(
            backend,
            Arc::clone(&queue),
            notifier.clone(),
            poller,
            ResultStore::new(config.output_dir.clone()),
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&queue),
            runner,
            config.tick_interval,
        ));

        let cancel = CancellationToken::new();
        let loop_handle = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        tracing::info!(output_dir = %config.output_dir.display(), "Generation service started");

        Arc::new(Self {
            queue,
            scheduler,
            notifier,
            cancel,
            loop_handle: Mutex::new(Some(loop_handle)),
        })
    }

    /// Queue a job for `owner` and assert its busy indicator.
    ///
    /// Fails once [`shutdown`](Self::shutdown) has started.
    pub fn enqueue(
        &self,
        owner: OwnerId,
        payload: GenerationPayload,
    ) -> Result<JobTicket, EnqueueError> {
        let ticket = self.queue.enqueue(owner, payload)?;
        let owner = &ticket.owner;
        self.notifier
            .sync_busy(owner, || self.queue.busy_count(owner));
        Ok(ticket)
    }

    /// Cancel every pending and active job of `owner`.
    ///
    /// Removed pending jobs are reported as cancelled here. The active job,
    /// if any, reports its own terminal event once its runner tears down.
    pub fn cancel(&self, owner: &OwnerId) -> CancelSummary {
        let summary = self.queue.cancel(owner);
        self.report_removed(owner, &summary.pending_removed, summary.active_signalled.is_some());
        summary
    }

    pub fn is_active(&self, owner: &OwnerId) -> bool {
        self.queue.is_active(owner)
    }

    pub fn is_pending(&self, owner: &OwnerId) -> bool {
        self.queue.is_pending(owner)
    }

    pub fn busy_count(&self, owner: &OwnerId) -> usize {
        self.queue.busy_count(owner)
    }

    pub fn status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Stop the scheduler loop, cancel all work and wait for the active
    /// job to tear down. Later enqueues are rejected.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down generation service");
        self.cancel.cancel();

        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, handle).await;
        }

        let (removed, active) = self.queue.close();
        let active_owner = active.map(|(owner, _)| owner);
        let owners: BTreeSet<&OwnerId> = removed.iter().map(|(owner, _)| owner).collect();
        for owner in owners {
            let ids: Vec<JobId> = removed
                .iter()
                .filter(|(o, _)| o == owner)
                .map(|(_, id)| *id)
                .collect();
            self.report_removed(owner, &ids, active_owner.as_ref() == Some(owner));
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, self.scheduler.wait_for_running())
            .await
            .is_err()
        {
            tracing::warn!("Active job did not stop within the shutdown grace period");
        }

        tracing::info!("Generation service shut down");
    }

    fn report_removed(&self, owner: &OwnerId, removed: &[JobId], owner_active: bool) {
        for &job_id in removed {
            self.notifier.notify(owner, OwnerEvent::Cancelled { job_id });
        }
        if !owner_active {
            self.notifier.progress(owner, ProgressUpdate::ZERO);
            self.notifier
                .sync_busy(owner, || self.queue.busy_count(owner));
        }
    }
}
