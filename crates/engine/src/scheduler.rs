//! Periodic promotion of pending jobs.
//!
//! A single long-lived Tokio task ticks every `tick_interval` and, when no
//! job is active, promotes the oldest pending job and hands it to the
//! [`JobRunner`] on its own task. Ticks fire on a fixed timer regardless of
//! job duration, so each tick is guarded against overlapping another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use easel_core::types::JobId;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::queue::{JobQueue, Promotion};
use crate::runner::{JobRunner, JobState};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still in progress.
    Skipped,
    /// A job is already active.
    Busy,
    /// Nothing pending.
    Idle,
    /// This job was promoted and its runner spawned.
    Promoted(JobId),
}

/// Drives the queue: one promotion attempt per tick.
pub struct Scheduler {
    queue: Arc<JobQueue>,
    runner: Arc<JobRunner>,
    tick_interval: Duration,
    ticking: AtomicBool,
    running: Mutex<Option<JoinHandle<JobState>>>,
}

/// Clears the in-progress flag when a tick ends, however it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(queue: Arc<JobQueue>, runner: Arc<JobRunner>, tick_interval: Duration) -> Self {
        Self {
            queue,
            runner,
            tick_interval,
            ticking: AtomicBool::new(false),
            running: Mutex::new(None),
        }
    }

    /// Run the tick loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "Job scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
    }

    /// One promotion attempt. Must be called inside a Tokio runtime.
    pub fn tick(&self) -> TickOutcome {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return TickOutcome::Skipped;
        }
        let _guard = TickGuard(&self.ticking);

        // The queue lock is released before the runner task is spawned.
        let job = match self.queue.try_promote() {
            Promotion::Busy => return TickOutcome::Busy,
            Promotion::Empty => return TickOutcome::Idle,
            Promotion::Promoted(job) => job,
        };

        let job_id = job.id;
        tracing::info!(job_id = %job_id, owner = %job.owner, "Job promoted to active");

        let runner = Arc::clone(&self.runner);
        let handle = tokio::spawn(async move { runner.run(job).await });
        *self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        TickOutcome::Promoted(job_id)
    }

    /// Wait for the most recently promoted job's runner to finish.
    ///
    /// Returns `None` if nothing has been promoted since the last call.
    pub async fn wait_for_running(&self) -> Option<JobState> {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        match handle.await {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::error!(error = %e, "Job runner task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use easel_core::types::{GenerationPayload, OwnerId};

    use super::*;
    use crate::backend::{GenerationBackend, GenerationOutput, StatusSnapshot};
    use crate::delivery::{ChannelSink, OwnerNotifier};
    use crate::error::JobError;
    use crate::progress::{PollSettings, ProgressPoller};
    use crate::store::ResultStore;
    use crate::view::AlwaysInView;

    /// Returns an empty result immediately.
    struct EmptyBackend;

    #[async_trait]
    impl GenerationBackend for EmptyBackend {
        async fn submit(
            &self,
            _payload: &GenerationPayload,
            _cancel: &CancellationToken,
        ) -> Result<GenerationOutput, JobError> {
            Ok(GenerationOutput::default())
        }

        async fn poll_status(&self, _cancel: &CancellationToken) -> Result<StatusSnapshot, JobError> {
            Err(JobError::Transport("offline".into()))
        }
    }

    fn scheduler(queue: &Arc<JobQueue>) -> Scheduler {
        let backend: Arc<dyn GenerationBackend> = Arc::new(EmptyBackend);
        let (sink, _rx) = ChannelSink::channel();
        let notifier = OwnerNotifier::inline(Arc::new(sink));
        let poller = ProgressPoller::new(
            Arc::clone(&backend),
            Arc::new(AlwaysInView),
            notifier.clone(),
            PollSettings {
                interval: Duration::from_millis(200),
                timeout: Duration::from_secs(2),
                error_threshold: 5,
            },
        );
        let runner = JobRunner::new(
            backend,
            Arc::clone(queue),
            notifier,
            poller,
            ResultStore::new(std::env::temp_dir().join("easel-scheduler-tests")),
        );
        Scheduler::new(Arc::clone(queue), Arc::new(runner), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn idle_tick_promotes_nothing() {
        let queue = Arc::new(JobQueue::new());
        let scheduler = scheduler(&queue);

        assert_eq!(scheduler.tick(), TickOutcome::Idle);
        assert_eq!(scheduler.wait_for_running().await, None);
    }

    #[tokio::test]
    async fn tick_promotes_oldest_then_backs_off() {
        let queue = Arc::new(JobQueue::new());
        let scheduler = scheduler(&queue);
        let first = queue.enqueue(OwnerId::new("tab-1"), GenerationPayload::new()).unwrap();
        queue.enqueue(OwnerId::new("tab-2"), GenerationPayload::new()).unwrap();

        assert_eq!(scheduler.tick(), TickOutcome::Promoted(first.id));
        // The first runner may not have released the slot yet.
        assert_matches!(scheduler.tick(), TickOutcome::Busy | TickOutcome::Promoted(_));
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let queue = Arc::new(JobQueue::new());
        let scheduler = scheduler(&queue);
        queue.enqueue(OwnerId::new("tab-1"), GenerationPayload::new()).unwrap();

        scheduler.ticking.store(true, Ordering::SeqCst);
        assert_eq!(scheduler.tick(), TickOutcome::Skipped);
        assert_eq!(queue.status().pending, 1);

        scheduler.ticking.store(false, Ordering::SeqCst);
        assert_matches!(scheduler.tick(), TickOutcome::Promoted(_));
    }

    #[tokio::test]
    async fn finished_job_frees_the_slot() {
        let queue = Arc::new(JobQueue::new());
        let scheduler = scheduler(&queue);
        queue.enqueue(OwnerId::new("tab-1"), GenerationPayload::new()).unwrap();

        assert_matches!(scheduler.tick(), TickOutcome::Promoted(_));
        assert_eq!(scheduler.wait_for_running().await, Some(JobState::Completed));
        assert_eq!(queue.status().active, 0);
        assert_eq!(scheduler.tick(), TickOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_stops_on_cancel() {
        let queue = Arc::new(JobQueue::new());
        let scheduler = Arc::new(scheduler(&queue));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        queue.enqueue(OwnerId::new("tab-1"), GenerationPayload::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(scheduler.wait_for_running().await, Some(JobState::Completed));

        cancel.cancel();
        handle.await.unwrap();
    }
}
