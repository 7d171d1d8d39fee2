//! Shared data model for the Parapet risk monitoring and workflow
//! governance engine.
//!
//! Defines the entities that flow between the detection layer and the
//! governance layer: metric observations, committee alerts, and workflow
//! locks, plus the identifier newtypes and state enums that tie them
//! together. All state transitions on these entities are one-directional
//! and terminal; the structs here carry the data, the governance store
//! enforces the transitions.

mod alert;
mod ids;
mod lock;
mod metric;

pub use alert::{
    AlertEvidence, AlertSeverity, AlertStatus, AlertType, CommitteeAlert, DetectionMethod,
};
pub use ids::{AlertId, LockId, PropertyId};
pub use lock::{LockStatus, LockSummary, LockType, WorkflowAction, WorkflowLock};
pub use metric::{AdverseDirection, MetricPoint, MetricType};
