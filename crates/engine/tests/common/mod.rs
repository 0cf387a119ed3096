#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use easel_core::types::{GenerationPayload, OwnerId};
use easel_engine::delivery::ChannelSink;
use easel_engine::view::{FocusTracker, InViewOracle};
use easel_engine::{
    EngineConfig, GenerationBackend, GenerationOutput, GenerationService, JobError, OwnerEvent,
    OwnerNotifier, OwnerSink, StatusSnapshot,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long any single wait in a test may take before it fails.
const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a test `EngineConfig` with short intervals writing into `dir`.
pub fn test_config(dir: &std::path::Path) -> EngineConfig {
    EngineConfig {
        tick_interval: Duration::from_millis(10),
        poll_interval: Duration::from_millis(20),
        poll_timeout: Duration::from_millis(50),
        poll_error_threshold: 3,
        output_dir: dir.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// What one `submit` call does.
#[derive(Debug, Clone)]
pub enum Submit {
    /// Sleep, then return this many one-byte images.
    Images { delay: Duration, count: usize },
    /// Fail with a backend error after `delay`.
    Fail { delay: Duration, message: String },
    /// Block until the job is cancelled.
    WaitForCancel,
}

impl Submit {
    pub fn images(delay_ms: u64, count: usize) -> Self {
        Submit::Images {
            delay: Duration::from_millis(delay_ms),
            count,
        }
    }
}

/// What every `poll_status` call does.
#[derive(Debug, Clone)]
pub enum Status {
    Progress { fraction: f64, eta_secs: f64 },
    Fail,
    /// Never answers until cancelled.
    Hang,
}

/// Scripted stand-in for the inference server.
pub struct FakeBackend {
    script: Mutex<VecDeque<Submit>>,
    status: Mutex<Status>,
    payloads: Mutex<Vec<GenerationPayload>>,
    submits: AtomicUsize,
    polls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeBackend {
    /// Submissions not covered by `script` return one image after 30ms.
    pub fn new(script: Vec<Submit>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            status: Mutex::new(Status::Progress {
                fraction: 0.5,
                eta_secs: 3.0,
            }),
            payloads: Mutex::new(Vec::new()),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub fn with_status(self, status: Status) -> Self {
        *self.status.lock().unwrap() = status;
        self
    }

    pub fn set_status(&self, status: Status) {
        *self.status.lock().unwrap() = status;
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<GenerationPayload> {
        self.payloads.lock().unwrap().clone()
    }

    async fn run_script(
        &self,
        step: Submit,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, JobError> {
        match step {
            Submit::Images { delay, count } => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(JobError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(GenerationOutput {
                        images: (0..count).map(|i| vec![i as u8]).collect(),
                        info: "{\"seed\":42}".to_string(),
                    }),
                }
            }
            Submit::Fail { delay, message } => {
                tokio::time::sleep(delay).await;
                Err(JobError::Backend(message))
            }
            Submit::WaitForCancel => {
                cancel.cancelled().await;
                Err(JobError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn submit(
        &self,
        payload: &GenerationPayload,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, JobError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Submit::images(30, 1));
        let result = self.run_script(step, cancel).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn poll_status(&self, cancel: &CancellationToken) -> Result<StatusSnapshot, JobError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let status = self.status.lock().unwrap().clone();
        match status {
            Status::Progress { fraction, eta_secs } => Ok(StatusSnapshot {
                progress_fraction: fraction,
                eta_secs,
                state_info: None,
            }),
            Status::Fail => Err(JobError::Transport("connection refused".into())),
            Status::Hang => {
                cancel.cancelled().await;
                Err(JobError::Cancelled)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A running service plus everything a test needs to observe it.
pub struct Harness {
    pub service: Arc<GenerationService>,
    pub backend: Arc<FakeBackend>,
    pub focus: Arc<FocusTracker>,
    pub events: mpsc::UnboundedReceiver<(OwnerId, OwnerEvent)>,
    pub output_dir: tempfile::TempDir,
}

impl Harness {
    /// Start a service with a focus tracker as the in-view oracle.
    pub fn start(backend: FakeBackend) -> Self {
        let focus = Arc::new(FocusTracker::new());
        Self::start_with_oracle(backend, Arc::clone(&focus) as Arc<dyn InViewOracle>, focus)
    }

    pub fn start_with_oracle(
        backend: FakeBackend,
        oracle: Arc<dyn InViewOracle>,
        focus: Arc<FocusTracker>,
    ) -> Self {
        Self::build(backend, oracle, focus, |sink| Arc::new(sink))
    }

    /// Start a service whose events pass through the sink built by `wrap`
    /// before reaching the harness channel.
    pub fn start_with_sink(
        backend: FakeBackend,
        wrap: impl FnOnce(ChannelSink) -> Arc<dyn OwnerSink>,
    ) -> Self {
        let focus = Arc::new(FocusTracker::new());
        Self::build(backend, Arc::clone(&focus) as Arc<dyn InViewOracle>, focus, wrap)
    }

    fn build(
        backend: FakeBackend,
        oracle: Arc<dyn InViewOracle>,
        focus: Arc<FocusTracker>,
        wrap: impl FnOnce(ChannelSink) -> Arc<dyn OwnerSink>,
    ) -> Self {
        let output_dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(backend);
        let (sink, events) = ChannelSink::channel();
        let service = GenerationService::start(
            &test_config(output_dir.path()),
            Arc::clone(&backend) as Arc<dyn GenerationBackend>,
            oracle,
            OwnerNotifier::inline(wrap(sink)),
        );
        Self {
            service,
            backend,
            focus,
            events,
            output_dir,
        }
    }

    pub async fn next_event(&mut self) -> (OwnerId, OwnerEvent) {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for an owner event")
            .expect("event channel closed")
    }

    /// Receive events until `count` terminal events have been seen.
    pub async fn until_terminals(&mut self, count: usize) -> Vec<(OwnerId, OwnerEvent)> {
        let mut seen = Vec::new();
        let mut terminals = 0;
        while terminals < count {
            let event = self.next_event().await;
            if event.1.is_terminal() {
                terminals += 1;
            }
            seen.push(event);
        }
        seen
    }

    /// Let trailing notifications arrive, then drain them.
    pub async fn settle(&mut self) -> Vec<(OwnerId, OwnerEvent)> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.drain()
    }

    /// Everything delivered so far, without waiting.
    pub fn drain(&mut self) -> Vec<(OwnerId, OwnerEvent)> {
        let mut seen = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            seen.push(event);
        }
        seen
    }

    /// Wait until `owner` holds the active slot.
    pub async fn wait_until_active(&self, owner: &OwnerId) {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            while !self.service.is_active(owner) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job never became active");
    }
}

pub fn payload(json: serde_json::Value) -> GenerationPayload {
    match json {
        serde_json::Value::Object(map) => map,
        other => panic!("payload must be a JSON object, got {other}"),
    }
}

/// Events addressed to `owner`, in delivery order.
pub fn for_owner(events: &[(OwnerId, OwnerEvent)], owner: &OwnerId) -> Vec<OwnerEvent> {
    events
        .iter()
        .filter(|(o, _)| o == owner)
        .map(|(_, e)| e.clone())
        .collect()
}
