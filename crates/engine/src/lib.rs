//! Generation job engine.
//!
//! Accepts generation requests from many owners (UI tabs), runs them one
//! at a time against the inference server, and reports busy state,
//! progress and results back to each owner:
//!
//! - [`JobQueue`] -- FIFO pending jobs plus the single active slot.
//! - [`Scheduler`] -- periodic tick that promotes the oldest pending job
//!   when nothing is active.
//! - [`JobRunner`] -- drives one active job through submission, result
//!   storage and cleanup.
//! - [`ProgressPoller`] -- polls the server's status while a job runs and
//!   forwards progress to the owner currently in view.
//! - [`GenerationService`] -- the facade constructed once at startup.

pub mod backend;
pub mod config;
pub mod delivery;
pub mod error;
pub mod progress;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod view;

pub use backend::{GenerationBackend, GenerationOutput, StatusSnapshot};
pub use config::EngineConfig;
pub use delivery::{OwnerEvent, OwnerNotifier, OwnerSink};
pub use error::{EnqueueError, JobError};
pub use progress::ProgressPoller;
pub use queue::JobQueue;
pub use runner::{JobRunner, JobState};
pub use scheduler::{Scheduler, TickOutcome};
pub use service::GenerationService;
