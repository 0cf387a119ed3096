//! Execution of one active job.
//!
//! [`JobRunner::run`] takes a job the scheduler just promoted and drives
//! it through `Active -> Finishing -> {Completed, Cancelled, Failed}`.
//! The submission call and a [`ProgressPoller`] run concurrently; once the
//! submission returns, the poller is stopped and awaited so its final zero
//! update always precedes the job's terminal notification.
//!
//! Whatever the outcome, the job leaves the active slot through
//! [`JobQueue::finish`] and the owner's indicators are reset.

use std::sync::Arc;

use chrono::Utc;
use easel_core::progress::ProgressUpdate;
use easel_core::types::Timestamp;
use tracing::Instrument;

use crate::backend::{GenerationBackend, GenerationOutput};
use crate::delivery::{OwnerEvent, OwnerNotifier};
use crate::error::JobError;
use crate::progress::ProgressPoller;
use crate::queue::{Job, JobQueue};
use crate::store::ResultStore;

/// Lifecycle of a job as seen by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Active,
    Finishing,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// Runs promoted jobs against the backend.
pub struct JobRunner {
    backend: Arc<dyn GenerationBackend>,
    queue: Arc<JobQueue>,
    notifier: OwnerNotifier,
    poller: ProgressPoller,
    store: ResultStore,
}

impl JobRunner {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        queue: Arc<JobQueue>,
        notifier: OwnerNotifier,
        poller: ProgressPoller,
        store: ResultStore,
    ) -> Self {
        Self {
            backend,
            queue,
            notifier,
            poller,
            store,
        }
    }

    /// Execute `job` to a terminal state and release the active slot.
    pub async fn run(&self, job: Job) -> JobState {
        let span = tracing::info_span!("job", job_id = %job.id, owner = %job.owner);
        async {
            let state = self.execute(&job).await;
            debug_assert!(state.is_terminal());
            self.release(&job);
            state
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, job: &Job) -> JobState {
        let owner = &job.owner;

        if job.is_cancelled() {
            tracing::info!("Job cancelled before it started");
            self.notifier
                .notify(owner, OwnerEvent::Cancelled { job_id: job.id });
            return JobState::Cancelled;
        }

        let started_at = job.started_at.unwrap_or_else(Utc::now);
        tracing::info!(state = ?JobState::Active, "Generation started");
        self.notifier.progress(owner, ProgressUpdate::ZERO);

        // A child token: stopping the poller must not cancel the job, but
        // cancelling the job stops the poller.
        let poll_stop = job.cancellation().child_token();
        let poll_task = tokio::spawn(self.poller.clone().run(owner.clone(), poll_stop.clone()));

        let result = self.backend.submit(&job.payload, job.cancellation()).await;

        poll_stop.cancel();
        if let Err(e) = poll_task.await {
            tracing::warn!(error = %e, "Progress poller task failed");
        }

        match result {
            Ok(output) => self.finish(job, started_at, output).await,
            Err(e) if e.is_cancelled() || job.is_cancelled() => {
                tracing::info!("Generation cancelled");
                self.notifier
                    .notify(owner, OwnerEvent::Cancelled { job_id: job.id });
                JobState::Cancelled
            }
            Err(e) => self.fail(job, e),
        }
    }

    async fn finish(&self, job: &Job, started_at: Timestamp, output: GenerationOutput) -> JobState {
        tracing::debug!(state = ?JobState::Finishing, images = output.images.len());

        let paths = if output.images.is_empty() {
            tracing::info!("Generation returned no images");
            Vec::new()
        } else {
            match self.store.save(job.id, &output.images).await {
                Ok(paths) => paths,
                Err(e) => return self.fail(job, JobError::Storage(e)),
            }
        };

        let elapsed_secs = elapsed_secs_since(started_at);
        tracing::info!(
            images = paths.len(),
            elapsed_ms = (elapsed_secs * 1000.0) as u64,
            "Generation completed",
        );
        self.notifier.notify(
            &job.owner,
            OwnerEvent::Completed {
                job_id: job.id,
                paths,
                elapsed_secs,
                info: output.info,
            },
        );
        JobState::Completed
    }

    fn fail(&self, job: &Job, error: JobError) -> JobState {
        tracing::error!(error = %error, "Generation failed");
        self.notifier.notify(
            &job.owner,
            OwnerEvent::Failed {
                job_id: job.id,
                error: error.to_string(),
            },
        );
        JobState::Failed
    }

    /// Leave the active slot and reset the owner's indicators.
    ///
    /// If the owner still has queued work, its busy indicator stays on.
    /// The busy state is re-read when it is published, since the owner may
    /// enqueue again (even from the progress callback) after `finish`.
    fn release(&self, job: &Job) {
        let owner = &job.owner;
        let outcome = self.queue.finish(job.id, owner);
        if !outcome.was_active {
            tracing::warn!("Finished job no longer held the active slot");
        }
        self.notifier.progress(owner, ProgressUpdate::ZERO);
        if !outcome.owner_has_pending {
            self.notifier
                .sync_busy(owner, || self.queue.busy_count(owner));
        }
    }
}

fn elapsed_secs_since(started_at: Timestamp) -> f64 {
    let elapsed = Utc::now() - started_at;
    (elapsed.num_milliseconds() as f64 / 1000.0).max(0.0)
}
