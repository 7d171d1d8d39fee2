//! Governance layer for the Parapet risk engine.
//!
//! Consumes detection signals and enforces the workflow consequences:
//! - [`AlertManager`]: committee alert lifecycle with open-alert dedup,
//!   escalation, and terminal resolution
//! - [`LockEngine`]: lock queries, summaries, and the expiry sweep
//! - [`ActionGate`]: the synchronous, fail-closed checkpoint workflow
//!   systems call before refinancing, selling, or disposing a property
//! - [`DetectionCycle`]: the scheduled sweep wiring a metric source and
//!   detectors into the alert store
//!
//! All state lives behind the [`GovernanceStore`] trait, with in-memory
//! and PostgreSQL backends.

mod alerts;
mod cycle;
mod error;
mod gate;
mod locks;
mod store;

pub use alerts::{AlertManager, AlertOutcome, GovernancePolicy};
pub use cycle::{CycleReport, DetectionCycle};
pub use error::GovernanceError;
pub use gate::{ActionDecision, ActionGate};
pub use locks::LockEngine;
pub use store::{
    AlertResolution, AlertWrite, GovernanceStore, MemoryGovernanceStore, PostgresGovernanceStore,
};
