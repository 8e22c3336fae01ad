//! Batched host probing and run orchestration.
//!
//! # Architecture
//!
//! ```text
//! RunOrchestrator::run(config)
//!     ├─ TokenManager::resolve        (pulse-auth, before any probe)
//!     ├─ ProbeEngine::run             batches in order, hosts in a batch joined
//!     └─ ResultSink::insert × N       (pulse-storage, one commit per outcome)
//! ```
//!
//! A run never aborts because of one host: every distinct input host ends up
//! with exactly one [`ProbeOutcome`](pulse_types::ProbeOutcome) in the
//! returned [`ResultSet`](pulse_types::ResultSet).

mod probe;
mod run;

pub use probe::{ProbeEngine, ProbeRequest, dedupe, partition, record_failure};
pub use run::{RunOrchestrator, RunReport};
