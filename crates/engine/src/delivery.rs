//! Delivery of owner notifications.
//!
//! The engine never calls into the presentation layer directly. Every
//! notification is an [`OwnerEvent`] handed to an [`OwnerSink`], and the
//! hand-off itself runs through a [`DeliveryContext`] so the embedding
//! application decides which thread or task executes it. Tests use the
//! synchronous [`InlineContext`].

use std::path::PathBuf;
use std::sync::Arc;

use easel_core::progress::ProgressUpdate;
use easel_core::types::{JobId, OwnerId};
use serde::Serialize;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A notification for the owner of one or more jobs.
///
/// Per job an owner sees zero or more `Progress` events followed by
/// exactly one of `Completed`, `Cancelled` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OwnerEvent {
    /// Whether the owner has work queued or running.
    Busy { busy: bool },

    /// Progress of the owner's running job. Zero means "show nothing".
    Progress(ProgressUpdate),

    /// The job finished. `paths` is empty when the server returned no images.
    Completed {
        job_id: JobId,
        paths: Vec<PathBuf>,
        elapsed_secs: f64,
        info: String,
    },

    /// The job was cancelled before or during generation.
    Cancelled { job_id: JobId },

    /// The job failed; no automatic retry is attempted.
    Failed { job_id: JobId, error: String },
}

impl OwnerEvent {
    /// Whether this event ends a job's notification sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OwnerEvent::Completed { .. } | OwnerEvent::Cancelled { .. } | OwnerEvent::Failed { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receiver of owner notifications (the presentation layer's callbacks).
pub trait OwnerSink: Send + Sync {
    fn deliver(&self, owner: &OwnerId, event: OwnerEvent);
}

/// Sink that forwards every event into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(OwnerId, OwnerEvent)>,
}

impl ChannelSink {
    /// Create a sink plus the receiver the consumer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(OwnerId, OwnerEvent)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OwnerSink for ChannelSink {
    fn deliver(&self, owner: &OwnerId, event: OwnerEvent) {
        // A closed receiver means the UI is gone; nothing left to notify.
        let _ = self.tx.send((owner.clone(), event));
    }
}

// ---------------------------------------------------------------------------
// Delivery contexts
// ---------------------------------------------------------------------------

/// A unit of delivery work.
pub type DeliveryTask = Box<dyn FnOnce() + Send + 'static>;

/// Where notification callbacks execute.
pub trait DeliveryContext: Send + Sync {
    /// Run `task` on this context. Tasks dispatched from one thread must
    /// run in dispatch order.
    fn dispatch(&self, task: DeliveryTask);
}

/// Runs every task immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineContext;

impl DeliveryContext for InlineContext {
    fn dispatch(&self, task: DeliveryTask) {
        task();
    }
}

/// Runs tasks one at a time, in order, on a dedicated Tokio task.
///
/// Models a single-threaded UI affinity: the engine never blocks on the
/// callbacks, and callbacks never run concurrently with each other.
pub struct SpawnContext {
    tx: mpsc::UnboundedSender<DeliveryTask>,
}

impl SpawnContext {
    /// Spawn the draining task. Must be called inside a Tokio runtime.
    ///
    /// The task exits once the context is dropped and the queue is empty.
    pub fn start() -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<DeliveryTask>();
        let handle = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
            tracing::debug!("Delivery context drained");
        });
        (Self { tx }, handle)
    }
}

impl DeliveryContext for SpawnContext {
    fn dispatch(&self, task: DeliveryTask) {
        if self.tx.send(task).is_err() {
            tracing::warn!("Delivery context closed; dropping notification");
        }
    }
}

// ---------------------------------------------------------------------------
// OwnerNotifier
// ---------------------------------------------------------------------------

/// The engine's only path to owners: a sink paired with a context.
#[derive(Clone)]
pub struct OwnerNotifier {
    context: Arc<dyn DeliveryContext>,
    sink: Arc<dyn OwnerSink>,
}

impl OwnerNotifier {
    pub fn new(context: Arc<dyn DeliveryContext>, sink: Arc<dyn OwnerSink>) -> Self {
        Self { context, sink }
    }

    /// Notifier that delivers synchronously on the calling thread.
    pub fn inline(sink: Arc<dyn OwnerSink>) -> Self {
        Self::new(Arc::new(InlineContext), sink)
    }

    pub fn notify(&self, owner: &OwnerId, event: OwnerEvent) {
        let sink = Arc::clone(&self.sink);
        let owner = owner.clone();
        self.context
            .dispatch(Box::new(move || sink.deliver(&owner, event)));
    }

    pub fn busy(&self, owner: &OwnerId, busy: bool) {
        self.notify(owner, OwnerEvent::Busy { busy });
    }

    pub fn progress(&self, owner: &OwnerId, update: ProgressUpdate) {
        self.notify(owner, OwnerEvent::Progress(update));
    }

    /// Publish whether `owner` is busy according to `busy_count`.
    ///
    /// The count is read again after every notification and the state is
    /// re-sent if it moved, so the last `Busy` an owner receives always
    /// matches the queue even when an enqueue or cancel lands in between
    /// (including one made from inside the sink itself).
    pub fn sync_busy(&self, owner: &OwnerId, busy_count: impl Fn() -> usize) {
        let mut busy = busy_count() > 0;
        loop {
            self.busy(owner, busy);
            let now = busy_count() > 0;
            if now == busy {
                return;
            }
            busy = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_notifier_delivers_immediately() {
        let (sink, mut rx) = ChannelSink::channel();
        let notifier = OwnerNotifier::inline(Arc::new(sink));
        let owner = OwnerId::new("tab-1");

        notifier.busy(&owner, true);
        notifier.progress(&owner, ProgressUpdate::new(0.5, 3.0));

        assert_eq!(
            rx.try_recv().unwrap(),
            (owner.clone(), OwnerEvent::Busy { busy: true })
        );
        assert_eq!(
            rx.try_recv().unwrap().1,
            OwnerEvent::Progress(ProgressUpdate::new(0.5, 3.0))
        );
    }

    #[tokio::test]
    async fn spawn_context_preserves_order() {
        let (sink, mut rx) = ChannelSink::channel();
        let (context, handle) = SpawnContext::start();
        let notifier = OwnerNotifier::new(Arc::new(context), Arc::new(sink));
        let owner = OwnerId::new("tab-1");

        for i in 0..10 {
            notifier.progress(&owner, ProgressUpdate::new(i as f64 / 10.0, 0.0));
        }
        drop(notifier);
        handle.await.unwrap();

        for i in 0..10 {
            let (_, event) = rx.recv().await.unwrap();
            assert_eq!(
                event,
                OwnerEvent::Progress(ProgressUpdate::new(i as f64 / 10.0, 0.0))
            );
        }
    }

    #[test]
    fn sync_busy_resends_when_count_moves_underneath() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (sink, mut rx) = ChannelSink::channel();
        let notifier = OwnerNotifier::inline(Arc::new(sink));
        let owner = OwnerId::new("tab-1");

        // Idle on the first read, busy from then on: an enqueue raced in.
        let reads = AtomicUsize::new(0);
        notifier.sync_busy(&owner, || usize::from(reads.fetch_add(1, Ordering::SeqCst) > 0));

        assert_eq!(rx.try_recv().unwrap().1, OwnerEvent::Busy { busy: false });
        assert_eq!(rx.try_recv().unwrap().1, OwnerEvent::Busy { busy: true });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sync_busy_sends_once_when_stable() {
        let (sink, mut rx) = ChannelSink::channel();
        let notifier = OwnerNotifier::inline(Arc::new(sink));

        notifier.sync_busy(&OwnerId::new("tab-1"), || 2);

        assert_eq!(rx.try_recv().unwrap().1, OwnerEvent::Busy { busy: true });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn terminal_events() {
        let job_id = JobId::now_v7();
        assert!(OwnerEvent::Cancelled { job_id }.is_terminal());
        assert!(!OwnerEvent::Busy { busy: false }.is_terminal());
        assert!(!OwnerEvent::Progress(ProgressUpdate::ZERO).is_terminal());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(OwnerEvent::Busy { busy: true }).unwrap();
        assert_eq!(json["type"], "busy");
        assert_eq!(json["busy"], true);
    }
}
