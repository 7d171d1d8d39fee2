//! Governance store: the transactional boundary for alerts and locks.
//!
//! Every trait method is one atomic unit of work. The cross-entity
//! invariants — alert and its locks change together, the per-property
//! active flag always equals "some lock is locked" — hold at every
//! method boundary, on every backend.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use parapet_types::{
    AlertEvidence, AlertId, AlertSeverity, AlertStatus, CommitteeAlert, PropertyId, WorkflowLock,
};

use crate::error::GovernanceError;

pub use memory::MemoryGovernanceStore;
pub use postgres::PostgresGovernanceStore;

/// Outcome of an alert insert attempt.
///
/// A duplicate is a normal outcome of the open-alert uniqueness
/// constraint, not an error: the caller converts it into an update.
#[derive(Clone, Debug)]
pub enum AlertWrite {
    Created(CommitteeAlert),
    /// The existing pending alert for the same (property, alert type).
    DuplicatePending(CommitteeAlert),
}

/// Result of resolving an alert: the terminal alert plus every lock the
/// resolution released in the same unit of work.
#[derive(Clone, Debug)]
pub struct AlertResolution {
    pub alert: CommitteeAlert,
    pub released_locks: Vec<WorkflowLock>,
}

/// Persistence contract for the governance engine.
///
/// Implementations must serialize concurrent writers on the pending
/// (property, alert type) key: of two simultaneous `create_alert` calls
/// for the same key, exactly one observes `Created`.
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    /// Insert a pending alert and its locks atomically. If a pending
    /// alert already exists for the same (property, alert type), nothing
    /// is written and the existing alert is returned.
    async fn create_alert(
        &self,
        alert: CommitteeAlert,
        locks: Vec<WorkflowLock>,
    ) -> Result<AlertWrite, GovernanceError>;

    /// Append evidence to a pending alert and raise its severity if
    /// `severity` is strictly higher (severity never moves down). The
    /// supplied locks are inserted only if the alert has none yet, so a
    /// Warning → Critical escalation locks the property exactly once
    /// even under concurrent escalators.
    async fn escalate_alert(
        &self,
        alert_id: AlertId,
        severity: AlertSeverity,
        evidence: Vec<AlertEvidence>,
        locks: Vec<WorkflowLock>,
    ) -> Result<CommitteeAlert, GovernanceError>;

    async fn get_alert(&self, alert_id: AlertId) -> Result<Option<CommitteeAlert>, GovernanceError>;

    /// Transition a pending alert to a terminal status and, when
    /// `unlock` is set, every referencing locked lock to unlocked with
    /// its duration computed — all in the same unit of work.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_alert(
        &self,
        alert_id: AlertId,
        status: AlertStatus,
        user: &str,
        notes: Option<&str>,
        unlock: bool,
        unlock_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertResolution, GovernanceError>;

    async fn locks_for_alert(&self, alert_id: AlertId)
        -> Result<Vec<WorkflowLock>, GovernanceError>;

    async fn locks_for_property(
        &self,
        property_id: PropertyId,
    ) -> Result<Vec<WorkflowLock>, GovernanceError>;

    /// Transition locked locks older than `cutoff` to expired, whether
    /// their alert is still pending or was resolved under a keep-locked
    /// policy — the sweep is the only release path for the latter.
    /// Idempotent: terminal locks are untouched.
    async fn expire_locks(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowLock>, GovernanceError>;

    /// The derived per-property flag: true iff some lock is locked.
    async fn has_active_alerts(&self, property_id: PropertyId) -> Result<bool, GovernanceError>;
}
