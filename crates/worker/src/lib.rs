//! File-to-queue fan-out pipeline.
//!
//! Watches the in-progress storage prefix, gates each file on its job status,
//! publishes one durable message per CSV row into a per-file queue, then marks
//! the job queued and moves the file out of the watched prefix.

pub mod discovery;
pub mod eligibility;
pub mod heartbeat;
pub mod message;
pub mod orchestrator;
pub mod outcome;
pub mod progress;
pub mod publisher;
pub mod service;

pub use discovery::{DedupSet, Discovery};
pub use eligibility::{Eligibility, EligibilityGate};
pub use heartbeat::Heartbeat;
pub use message::{queue_name_for, MessageIdStrategy};
pub use orchestrator::{FileReport, Orchestrator, OrchestratorSettings};
pub use outcome::{OutcomeStatus, PublishOutcome};
pub use progress::{ProgressReporter, ProgressSnapshot, ProgressStats};
pub use publisher::FilePublisher;
pub use service::Service;
