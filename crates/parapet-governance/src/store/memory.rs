//! In-memory governance store.
//!
//! Authoritative backend for tests and embedded use. A single RwLock
//! over the whole state makes every trait method one atomic unit of
//! work, which is exactly the consistency contract the trait demands.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use parapet_types::{
    AlertEvidence, AlertId, AlertSeverity, AlertStatus, AlertType, CommitteeAlert, LockId,
    LockStatus, PropertyId, WorkflowLock,
};

use crate::error::GovernanceError;

use super::{AlertResolution, AlertWrite, GovernanceStore};

#[derive(Default)]
struct State {
    alerts: HashMap<AlertId, CommitteeAlert>,
    locks: HashMap<LockId, WorkflowLock>,
    /// Open-alert uniqueness index: at most one pending alert per key.
    pending: HashMap<(PropertyId, AlertType), AlertId>,
    locks_by_alert: HashMap<AlertId, Vec<LockId>>,
    locks_by_property: HashMap<PropertyId, Vec<LockId>>,
    active_flags: HashMap<PropertyId, bool>,
}

impl State {
    /// Recompute the derived flag from lock rows. Called inside every
    /// mutation that touches lock state, never separately.
    fn sync_active_flag(&mut self, property_id: PropertyId) {
        let active = self
            .locks_by_property
            .get(&property_id)
            .map(|ids| {
                ids.iter()
                    .any(|id| self.locks.get(id).is_some_and(|l| l.is_locked()))
            })
            .unwrap_or(false);
        self.active_flags.insert(property_id, active);
    }

    fn insert_locks(&mut self, locks: Vec<WorkflowLock>) {
        for lock in locks {
            self.locks_by_alert
                .entry(lock.alert_id)
                .or_default()
                .push(lock.id);
            self.locks_by_property
                .entry(lock.property_id)
                .or_default()
                .push(lock.id);
            self.locks.insert(lock.id, lock);
        }
    }
}

/// Process-local implementation of [`GovernanceStore`].
#[derive(Default)]
pub struct MemoryGovernanceStore {
    state: RwLock<State>,
}

impl MemoryGovernanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl GovernanceStore for MemoryGovernanceStore {
    async fn create_alert(
        &self,
        alert: CommitteeAlert,
        locks: Vec<WorkflowLock>,
    ) -> Result<AlertWrite, GovernanceError> {
        let mut state = self.state.write().await;
        let key = (alert.property_id, alert.alert_type);

        if let Some(existing_id) = state.pending.get(&key) {
            let existing = state
                .alerts
                .get(existing_id)
                .cloned()
                .ok_or(GovernanceError::AlertNotFound(*existing_id))?;
            return Ok(AlertWrite::DuplicatePending(existing));
        }

        let property_id = alert.property_id;
        state.pending.insert(key, alert.id);
        state.alerts.insert(alert.id, alert.clone());
        state.insert_locks(locks);
        state.sync_active_flag(property_id);
        Ok(AlertWrite::Created(alert))
    }

    async fn escalate_alert(
        &self,
        alert_id: AlertId,
        severity: AlertSeverity,
        evidence: Vec<AlertEvidence>,
        locks: Vec<WorkflowLock>,
    ) -> Result<CommitteeAlert, GovernanceError> {
        let mut state = self.state.write().await;

        let alert = state
            .alerts
            .get_mut(&alert_id)
            .ok_or(GovernanceError::AlertNotFound(alert_id))?;
        if alert.status.is_terminal() {
            return Err(GovernanceError::AlertAlreadyResolved {
                id: alert_id,
                status: alert.status,
            });
        }

        alert.evidence.extend(evidence);
        if severity > alert.severity {
            alert.severity = severity;
        }
        let updated = alert.clone();
        let property_id = updated.property_id;

        let has_locks = state
            .locks_by_alert
            .get(&alert_id)
            .is_some_and(|ids| !ids.is_empty());
        if !has_locks && !locks.is_empty() {
            state.insert_locks(locks);
            state.sync_active_flag(property_id);
        } else if !locks.is_empty() {
            debug!(%alert_id, "escalation locks already present, skipping insert");
        }

        Ok(updated)
    }

    async fn get_alert(
        &self,
        alert_id: AlertId,
    ) -> Result<Option<CommitteeAlert>, GovernanceError> {
        Ok(self.state.read().await.alerts.get(&alert_id).cloned())
    }

    async fn resolve_alert(
        &self,
        alert_id: AlertId,
        status: AlertStatus,
        user: &str,
        notes: Option<&str>,
        unlock: bool,
        unlock_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertResolution, GovernanceError> {
        debug_assert!(status.is_terminal());
        let mut state = self.state.write().await;

        let alert = state
            .alerts
            .get_mut(&alert_id)
            .ok_or(GovernanceError::AlertNotFound(alert_id))?;
        if alert.status.is_terminal() {
            return Err(GovernanceError::AlertAlreadyResolved {
                id: alert_id,
                status: alert.status,
            });
        }

        alert.status = status;
        alert.resolved_at = Some(now);
        alert.resolved_by = Some(user.to_string());
        alert.resolution_notes = notes.map(|n| n.to_string());
        let resolved = alert.clone();
        let property_id = resolved.property_id;

        state
            .pending
            .remove(&(property_id, resolved.alert_type));

        let mut released = vec![];
        if unlock {
            let lock_ids = state
                .locks_by_alert
                .get(&alert_id)
                .cloned()
                .unwrap_or_default();
            for lock_id in lock_ids {
                let Some(lock) = state.locks.get_mut(&lock_id) else {
                    continue;
                };
                if !lock.is_locked() {
                    continue;
                }
                let unlocked_at = now.max(lock.locked_at);
                lock.status = LockStatus::Unlocked;
                lock.unlocked_at = Some(unlocked_at);
                lock.unlocked_by = Some(user.to_string());
                lock.unlock_reason = Some(unlock_reason.to_string());
                lock.duration_hours =
                    Some((unlocked_at - lock.locked_at).num_seconds() as f64 / 3600.0);
                released.push(lock.clone());
            }
        }
        state.sync_active_flag(property_id);

        Ok(AlertResolution {
            alert: resolved,
            released_locks: released,
        })
    }

    async fn locks_for_alert(
        &self,
        alert_id: AlertId,
    ) -> Result<Vec<WorkflowLock>, GovernanceError> {
        let state = self.state.read().await;
        Ok(state
            .locks_by_alert
            .get(&alert_id)
            .map(|ids| ids.iter().filter_map(|id| state.locks.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn locks_for_property(
        &self,
        property_id: PropertyId,
    ) -> Result<Vec<WorkflowLock>, GovernanceError> {
        let state = self.state.read().await;
        Ok(state
            .locks_by_property
            .get(&property_id)
            .map(|ids| ids.iter().filter_map(|id| state.locks.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn expire_locks(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowLock>, GovernanceError> {
        let mut state = self.state.write().await;

        let stale: Vec<LockId> = state
            .locks
            .values()
            .filter(|lock| lock.is_locked() && lock.locked_at < cutoff)
            .map(|lock| lock.id)
            .collect();

        let mut expired = vec![];
        let mut touched = vec![];
        for lock_id in stale {
            let Some(lock) = state.locks.get_mut(&lock_id) else {
                continue;
            };
            let unlocked_at = now.max(lock.locked_at);
            lock.status = LockStatus::Expired;
            lock.unlocked_at = Some(unlocked_at);
            lock.unlock_reason = Some("expired by governance sweep".to_string());
            lock.duration_hours =
                Some((unlocked_at - lock.locked_at).num_seconds() as f64 / 3600.0);
            touched.push(lock.property_id);
            expired.push(lock.clone());
        }
        for property_id in touched {
            state.sync_active_flag(property_id);
        }

        Ok(expired)
    }

    async fn has_active_alerts(&self, property_id: PropertyId) -> Result<bool, GovernanceError> {
        Ok(self
            .state
            .read()
            .await
            .active_flags
            .get(&property_id)
            .copied()
            .unwrap_or(false))
    }
}
