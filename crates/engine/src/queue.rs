//! Pending jobs plus the single active slot.
//!
//! [`JobQueue`] is the one mutual-exclusion domain shared by submission,
//! cancellation, the scheduler's promotion and the runner's cleanup. The
//! backend runs one generation at a time, so at most one job is ever
//! active; pending jobs are promoted strictly in enqueue order.
//!
//! No operation here suspends. Queries are snapshots and may be stale by
//! the time the caller acts on them.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use easel_core::types::{GenerationPayload, JobId, OwnerId, Timestamp};
use tokio_util::sync::CancellationToken;

use crate::error::EnqueueError;

// ---------------------------------------------------------------------------
// Job records
// ---------------------------------------------------------------------------

/// A unit of generation work submitted by an owner.
///
/// Owned by the queue while pending, then moved into the runner when
/// promoted. Never reused after it finishes.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub owner: OwnerId,
    pub payload: GenerationPayload,
    pub enqueued_at: Timestamp,
    /// Set when the job is promoted to active.
    pub started_at: Option<Timestamp>,
    cancel: CancellationToken,
}

impl Job {
    /// The job's own cancellation handle. Cancelling it affects no other job.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What `enqueue` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    pub id: JobId,
    pub owner: OwnerId,
    pub enqueued_at: Timestamp,
}

/// Global counts for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    pub pending: usize,
    pub active: usize,
}

/// Jobs affected by [`JobQueue::cancel`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CancelSummary {
    /// Pending jobs removed from the queue, in queue order.
    pub pending_removed: Vec<JobId>,
    /// The owner's active job, whose token was triggered. Its runner tears
    /// down asynchronously.
    pub active_signalled: Option<JobId>,
}

impl CancelSummary {
    pub fn is_empty(&self) -> bool {
        self.pending_removed.is_empty() && self.active_signalled.is_none()
    }
}

/// Result of one promotion attempt.
#[derive(Debug)]
pub enum Promotion {
    /// A job is already active.
    Busy,
    /// Nothing is pending.
    Empty,
    /// The oldest pending job is now active and handed to the caller.
    Promoted(Job),
}

/// Result of removing the active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishOutcome {
    /// The job was still in the active slot (false if it was already gone).
    pub was_active: bool,
    /// The job's owner has more work queued.
    pub owner_has_pending: bool,
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

struct ActiveJob {
    id: JobId,
    owner: OwnerId,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    /// The single admission slot.
    active: Option<ActiveJob>,
    /// Set by [`JobQueue::close`]; no further jobs are accepted.
    closed: bool,
}

/// FIFO job store with single-job admission control.
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job to the pending sequence. Never blocks, and never
    /// rejects until the queue has been closed.
    ///
    /// The payload is moved into the job; duplicates from the same owner
    /// are kept as separate jobs.
    pub fn enqueue(
        &self,
        owner: OwnerId,
        payload: GenerationPayload,
    ) -> Result<JobTicket, EnqueueError> {
        let job = Job {
            id: JobId::now_v7(),
            owner,
            payload,
            enqueued_at: Utc::now(),
            started_at: None,
            cancel: CancellationToken::new(),
        };
        let ticket = JobTicket {
            id: job.id,
            owner: job.owner.clone(),
            enqueued_at: job.enqueued_at,
        };

        let mut state = self.lock();
        if state.closed {
            tracing::warn!(owner = %ticket.owner, "Job rejected, queue is closed");
            return Err(EnqueueError::Closed);
        }
        state.pending.push_back(job);
        tracing::debug!(
            job_id = %ticket.id,
            owner = %ticket.owner,
            pending = state.pending.len(),
            "Job enqueued",
        );

        Ok(ticket)
    }

    /// Cancel every pending and active job belonging to `owner`.
    ///
    /// Pending jobs are removed and their tokens triggered. The active job,
    /// if it belongs to `owner`, only has its token triggered; this call
    /// does not wait for the runner to tear it down.
    pub fn cancel(&self, owner: &OwnerId) -> CancelSummary {
        let mut state = self.lock();
        let mut summary = CancelSummary::default();

        let mut kept = VecDeque::with_capacity(state.pending.len());
        for job in state.pending.drain(..) {
            if &job.owner == owner {
                job.cancel.cancel();
                summary.pending_removed.push(job.id);
            } else {
                kept.push_back(job);
            }
        }
        state.pending = kept;

        if let Some(active) = state.active.as_ref().filter(|a| &a.owner == owner) {
            active.cancel.cancel();
            summary.active_signalled = Some(active.id);
        }

        if !summary.is_empty() {
            tracing::info!(
                owner = %owner,
                pending_removed = summary.pending_removed.len(),
                active_signalled = summary.active_signalled.is_some(),
                "Jobs cancelled",
            );
        }

        summary
    }

    /// Stop accepting jobs and cancel everything (shutdown).
    ///
    /// Returns the removed pending jobs' owners and ids, plus the signalled
    /// active job if any. The active job still leaves through `finish`.
    pub fn close(&self) -> (Vec<(OwnerId, JobId)>, Option<(OwnerId, JobId)>) {
        let mut state = self.lock();
        state.closed = true;
        let removed = state
            .pending
            .drain(..)
            .map(|job| {
                job.cancel.cancel();
                (job.owner, job.id)
            })
            .collect();
        let active = state.active.as_ref().map(|a| {
            a.cancel.cancel();
            (a.owner.clone(), a.id)
        });
        (removed, active)
    }

    /// Move the oldest pending job into the active slot if it is free.
    ///
    /// Called by the scheduler tick.
    pub fn try_promote(&self) -> Promotion {
        let mut state = self.lock();
        if state.active.is_some() {
            return Promotion::Busy;
        }
        let Some(mut job) = state.pending.pop_front() else {
            return Promotion::Empty;
        };

        job.started_at = Some(Utc::now());
        state.active = Some(ActiveJob {
            id: job.id,
            owner: job.owner.clone(),
            cancel: job.cancel.clone(),
        });

        Promotion::Promoted(job)
    }

    /// Clear the active slot if it still holds `job_id`.
    ///
    /// Called by the runner when a job reaches a terminal state.
    pub fn finish(&self, job_id: JobId, owner: &OwnerId) -> FinishOutcome {
        let mut state = self.lock();
        let was_active = state.active.as_ref().is_some_and(|a| a.id == job_id);
        if was_active {
            state.active = None;
        }
        FinishOutcome {
            was_active,
            owner_has_pending: state.pending.iter().any(|j| &j.owner == owner),
        }
    }

    pub fn is_active(&self, owner: &OwnerId) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|a| &a.owner == owner)
    }

    pub fn is_pending(&self, owner: &OwnerId) -> bool {
        self.lock().pending.iter().any(|j| &j.owner == owner)
    }

    /// Pending jobs for `owner`, plus one if its job is active.
    pub fn busy_count(&self, owner: &OwnerId) -> usize {
        let state = self.lock();
        let pending = state.pending.iter().filter(|j| &j.owner == owner).count();
        let active = state.active.as_ref().is_some_and(|a| &a.owner == owner);
        pending + usize::from(active)
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        QueueStatus {
            pending: state.pending.len(),
            active: usize::from(state.active.is_some()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn owner(name: &str) -> OwnerId {
        OwnerId::new(name)
    }

    fn promote(queue: &JobQueue) -> Job {
        match queue.try_promote() {
            Promotion::Promoted(job) => job,
            other => panic!("Expected a promotion, got {other:?}"),
        }
    }

    #[test]
    fn enqueue_never_deduplicates() {
        let queue = JobQueue::new();
        let a = queue.enqueue(owner("tab-1"), GenerationPayload::new()).unwrap();
        let b = queue.enqueue(owner("tab-1"), GenerationPayload::new()).unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(queue.status(), QueueStatus { pending: 2, active: 0 });
        assert_eq!(queue.busy_count(&owner("tab-1")), 2);
    }

    #[test]
    fn promotion_is_fifo_and_single_slot() {
        let queue = JobQueue::new();
        let first = queue.enqueue(owner("tab-2"), GenerationPayload::new()).unwrap();
        let second = queue.enqueue(owner("tab-1"), GenerationPayload::new()).unwrap();

        let job = promote(&queue);
        assert_eq!(job.id, first.id);
        assert!(job.started_at.is_some());
        assert_matches!(queue.try_promote(), Promotion::Busy);
        assert_eq!(queue.status(), QueueStatus { pending: 1, active: 1 });

        let outcome = queue.finish(job.id, &job.owner);
        assert!(outcome.was_active);
        assert!(!outcome.owner_has_pending);

        assert_eq!(promote(&queue).id, second.id);
        assert_matches!(queue.try_promote(), Promotion::Busy);
    }

    #[test]
    fn empty_queue_has_nothing_to_promote() {
        assert_matches!(JobQueue::new().try_promote(), Promotion::Empty);
    }

    #[test]
    fn cancel_removes_only_the_owners_pending_jobs() {
        let queue = JobQueue::new();
        let a1 = queue.enqueue(owner("a"), GenerationPayload::new()).unwrap();
        let b1 = queue.enqueue(owner("b"), GenerationPayload::new()).unwrap();
        let a2 = queue.enqueue(owner("a"), GenerationPayload::new()).unwrap();

        let summary = queue.cancel(&owner("a"));
        assert_eq!(summary.pending_removed, vec![a1.id, a2.id]);
        assert_eq!(summary.active_signalled, None);

        assert!(!queue.is_pending(&owner("a")));
        assert!(queue.is_pending(&owner("b")));
        let job = promote(&queue);
        assert_eq!(job.id, b1.id);
        assert!(!job.is_cancelled());
    }

    #[test]
    fn cancel_signals_active_job_without_clearing_slot() {
        let queue = JobQueue::new();
        queue.enqueue(owner("a"), GenerationPayload::new()).unwrap();
        let job = promote(&queue);

        let summary = queue.cancel(&owner("a"));
        assert_eq!(summary.active_signalled, Some(job.id));
        assert!(job.is_cancelled());
        // The runner clears the slot on its own schedule.
        assert!(queue.is_active(&owner("a")));

        queue.finish(job.id, &job.owner);
        assert!(!queue.is_active(&owner("a")));
    }

    #[test]
    fn cancel_leaves_other_owners_active_job_alone() {
        let queue = JobQueue::new();
        queue.enqueue(owner("b"), GenerationPayload::new()).unwrap();
        let job = promote(&queue);

        let summary = queue.cancel(&owner("a"));
        assert!(summary.is_empty());
        assert!(!job.is_cancelled());
    }

    #[test]
    fn finish_reports_remaining_work_for_owner() {
        let queue = JobQueue::new();
        queue.enqueue(owner("a"), GenerationPayload::new()).unwrap();
        queue.enqueue(owner("a"), GenerationPayload::new()).unwrap();
        let job = promote(&queue);
        assert_eq!(queue.busy_count(&owner("a")), 2);

        let outcome = queue.finish(job.id, &job.owner);
        assert!(outcome.owner_has_pending);
        assert_eq!(queue.busy_count(&owner("a")), 1);
    }

    #[test]
    fn finishing_a_stale_job_does_not_clear_the_slot() {
        let queue = JobQueue::new();
        queue.enqueue(owner("a"), GenerationPayload::new()).unwrap();
        let job = promote(&queue);

        let outcome = queue.finish(JobId::now_v7(), &owner("x"));
        assert!(!outcome.was_active);
        assert!(queue.is_active(&job.owner));
    }

    #[test]
    fn close_empties_queue_and_rejects_new_jobs() {
        let queue = JobQueue::new();
        queue.enqueue(owner("a"), GenerationPayload::new()).unwrap();
        let job = promote(&queue);
        queue.enqueue(owner("b"), GenerationPayload::new()).unwrap();

        let (removed, active) = queue.close();
        assert_eq!(removed.len(), 1);
        assert_eq!(active, Some((owner("a"), job.id)));
        assert!(job.is_cancelled());
        assert_eq!(queue.status().pending, 0);

        assert_matches!(
            queue.enqueue(owner("b"), GenerationPayload::new()),
            Err(EnqueueError::Closed)
        );
        assert_eq!(queue.status().pending, 0);
        // The active job can still leave.
        assert!(queue.finish(job.id, &job.owner).was_active);
    }
}
