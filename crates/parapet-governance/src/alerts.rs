//! Alert lifecycle: creation with dedup, escalation, and resolution.

use std::sync::Arc;

use tracing::info;

use parapet_types::{
    AlertEvidence, AlertId, AlertSeverity, AlertStatus, AlertType, CommitteeAlert, PropertyId,
    WorkflowLock,
};

use crate::error::GovernanceError;
use crate::store::{AlertResolution, AlertWrite, GovernanceStore};

/// Resolution policy knobs.
#[derive(Clone, Copy, Debug)]
pub struct GovernancePolicy {
    /// Whether rejecting an alert (condition judged a false positive)
    /// releases its locks. Off, a rejected alert's locks stay in place
    /// until the expiry sweep releases them.
    pub unlock_on_reject: bool,
}

impl Default for GovernancePolicy {
    fn default() -> Self {
        Self {
            unlock_on_reject: true,
        }
    }
}

/// Result of routing a detection signal into the alert store.
#[derive(Clone, Debug)]
pub enum AlertOutcome {
    Created(CommitteeAlert),
    /// An open alert for the same (property, alert type) absorbed the
    /// signal: evidence appended, severity raised if higher.
    Updated(CommitteeAlert),
}

impl AlertOutcome {
    pub fn alert(&self) -> &CommitteeAlert {
        match self {
            AlertOutcome::Created(alert) | AlertOutcome::Updated(alert) => alert,
        }
    }
}

/// Drives the alert state machine on top of a [`GovernanceStore`].
pub struct AlertManager {
    store: Arc<dyn GovernanceStore>,
    policy: GovernancePolicy,
}

impl AlertManager {
    pub fn new(store: Arc<dyn GovernanceStore>) -> Self {
        Self::with_policy(store, GovernancePolicy::default())
    }

    pub fn with_policy(store: Arc<dyn GovernanceStore>, policy: GovernancePolicy) -> Self {
        Self { store, policy }
    }

    /// Raise an alert, or fold the signal into the open alert for the
    /// same (property, alert type). Critical alerts lock the property in
    /// the same unit of work; a Warning → Critical escalation derives
    /// the locks at escalation time.
    pub async fn create_or_update_alert(
        &self,
        property_id: PropertyId,
        alert_type: AlertType,
        severity: AlertSeverity,
        evidence: Vec<AlertEvidence>,
    ) -> Result<AlertOutcome, GovernanceError> {
        let alert = CommitteeAlert::new(property_id, alert_type, severity, evidence.clone());
        let locks: Vec<WorkflowLock> = WorkflowLock::from_alert(&alert).into_iter().collect();

        match self.store.create_alert(alert, locks).await? {
            AlertWrite::Created(created) => {
                info!(
                    alert = %created.id,
                    property = %property_id,
                    alert_type = %alert_type,
                    severity = %created.severity,
                    locks = created.severity == AlertSeverity::Critical,
                    "alert created"
                );
                Ok(AlertOutcome::Created(created))
            }
            AlertWrite::DuplicatePending(existing) => {
                let target = existing.severity.max(severity);
                let locks = if target == AlertSeverity::Critical {
                    let mut escalated = existing.clone();
                    escalated.severity = target;
                    WorkflowLock::from_alert(&escalated).into_iter().collect()
                } else {
                    vec![]
                };
                let updated = self
                    .store
                    .escalate_alert(existing.id, target, evidence, locks)
                    .await?;
                info!(
                    alert = %updated.id,
                    property = %property_id,
                    alert_type = %alert_type,
                    severity = %updated.severity,
                    evidence_count = updated.evidence.len(),
                    "open alert updated"
                );
                Ok(AlertOutcome::Updated(updated))
            }
        }
    }

    /// Committee confirms the risk is real. Locks are always released:
    /// approval means the condition has been reviewed and the workflow
    /// restriction served its purpose.
    pub async fn approve_alert(
        &self,
        alert_id: AlertId,
        user: &str,
        notes: Option<&str>,
    ) -> Result<AlertResolution, GovernanceError> {
        let resolution = self
            .store
            .resolve_alert(
                alert_id,
                AlertStatus::Approved,
                user,
                notes,
                true,
                "alert approved",
                chrono::Utc::now(),
            )
            .await?;
        info!(
            alert = %alert_id,
            user,
            released = resolution.released_locks.len(),
            evidence_digest = %resolution.alert.evidence_digest(),
            "alert approved"
        );
        Ok(resolution)
    }

    /// Committee judges the alert a false positive.
    pub async fn reject_alert(
        &self,
        alert_id: AlertId,
        user: &str,
        notes: Option<&str>,
    ) -> Result<AlertResolution, GovernanceError> {
        let resolution = self
            .store
            .resolve_alert(
                alert_id,
                AlertStatus::Rejected,
                user,
                notes,
                self.policy.unlock_on_reject,
                "alert rejected",
                chrono::Utc::now(),
            )
            .await?;
        info!(
            alert = %alert_id,
            user,
            released = resolution.released_locks.len(),
            evidence_digest = %resolution.alert.evidence_digest(),
            "alert rejected"
        );
        Ok(resolution)
    }

    pub fn store(&self) -> &Arc<dyn GovernanceStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGovernanceStore;
    use chrono::NaiveDate;
    use parapet_types::{DetectionMethod, LockStatus, MetricType};

    fn evidence(observed: f64) -> Vec<AlertEvidence> {
        vec![AlertEvidence {
            metric: MetricType::Dscr,
            observed,
            period: NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
            method: DetectionMethod::StaticThreshold,
            score: None,
            baseline_mean: None,
            threshold: Some(1.25),
            detail: format!("dscr {observed} below critical threshold 1.25"),
        }]
    }

    fn manager() -> (AlertManager, Arc<MemoryGovernanceStore>) {
        let store = Arc::new(MemoryGovernanceStore::new());
        (AlertManager::new(store.clone()), store)
    }

    #[tokio::test]
    async fn critical_alert_locks_in_same_write() {
        let (manager, store) = manager();
        let property = PropertyId::new();

        let outcome = manager
            .create_or_update_alert(
                property,
                AlertType::DscrLow,
                AlertSeverity::Critical,
                evidence(1.10),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, AlertOutcome::Created(_)));
        assert!(store.has_active_alerts(property).await.unwrap());

        let locks = store.locks_for_alert(outcome.alert().id).await.unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks[0].is_locked());
    }

    #[tokio::test]
    async fn repeat_signal_updates_instead_of_duplicating() {
        let (manager, store) = manager();
        let property = PropertyId::new();

        let first = manager
            .create_or_update_alert(
                property,
                AlertType::DscrLow,
                AlertSeverity::Warning,
                evidence(1.28),
            )
            .await
            .unwrap();
        let second = manager
            .create_or_update_alert(
                property,
                AlertType::DscrLow,
                AlertSeverity::Warning,
                evidence(1.27),
            )
            .await
            .unwrap();

        let updated = match second {
            AlertOutcome::Updated(alert) => alert,
            other => panic!("expected update, got {:?}", other),
        };
        assert_eq!(updated.id, first.alert().id);
        assert_eq!(updated.evidence.len(), 2);
        assert_eq!(updated.severity, AlertSeverity::Warning);
        assert!(!store.has_active_alerts(property).await.unwrap());
    }

    #[tokio::test]
    async fn escalation_to_critical_locks_property() {
        let (manager, store) = manager();
        let property = PropertyId::new();

        let first = manager
            .create_or_update_alert(
                property,
                AlertType::OccupancyLow,
                AlertSeverity::Warning,
                evidence(84.0),
            )
            .await
            .unwrap();
        assert!(!store.has_active_alerts(property).await.unwrap());

        let escalated = manager
            .create_or_update_alert(
                property,
                AlertType::OccupancyLow,
                AlertSeverity::Critical,
                evidence(78.0),
            )
            .await
            .unwrap();
        assert_eq!(escalated.alert().id, first.alert().id);
        assert_eq!(escalated.alert().severity, AlertSeverity::Critical);
        assert!(store.has_active_alerts(property).await.unwrap());
    }

    #[tokio::test]
    async fn severity_never_downgrades() {
        let (manager, _) = manager();
        let property = PropertyId::new();

        manager
            .create_or_update_alert(
                property,
                AlertType::DscrLow,
                AlertSeverity::Critical,
                evidence(1.10),
            )
            .await
            .unwrap();
        let updated = manager
            .create_or_update_alert(
                property,
                AlertType::DscrLow,
                AlertSeverity::Warning,
                evidence(1.28),
            )
            .await
            .unwrap();
        assert_eq!(updated.alert().severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn approval_releases_locks_atomically() {
        let (manager, store) = manager();
        let property = PropertyId::new();

        let outcome = manager
            .create_or_update_alert(
                property,
                AlertType::DscrLow,
                AlertSeverity::Critical,
                evidence(1.10),
            )
            .await
            .unwrap();

        let resolution = manager
            .approve_alert(outcome.alert().id, "committee", Some("refinance deferred"))
            .await
            .unwrap();
        assert_eq!(resolution.alert.status, AlertStatus::Approved);
        assert_eq!(resolution.released_locks.len(), 1);
        assert_eq!(resolution.released_locks[0].status, LockStatus::Unlocked);
        assert!(!store.has_active_alerts(property).await.unwrap());
    }

    #[tokio::test]
    async fn reject_policy_can_keep_locks() {
        let store = Arc::new(MemoryGovernanceStore::new());
        let manager = AlertManager::with_policy(
            store.clone(),
            GovernancePolicy {
                unlock_on_reject: false,
            },
        );
        let property = PropertyId::new();

        let outcome = manager
            .create_or_update_alert(
                property,
                AlertType::DscrLow,
                AlertSeverity::Critical,
                evidence(1.10),
            )
            .await
            .unwrap();
        let resolution = manager
            .reject_alert(outcome.alert().id, "committee", Some("data error"))
            .await
            .unwrap();
        assert!(resolution.released_locks.is_empty());
        assert!(store.has_active_alerts(property).await.unwrap());
    }

    #[tokio::test]
    async fn resolved_alert_rejects_further_transitions() {
        let (manager, _) = manager();
        let outcome = manager
            .create_or_update_alert(
                PropertyId::new(),
                AlertType::DscrLow,
                AlertSeverity::Critical,
                evidence(1.10),
            )
            .await
            .unwrap();
        manager
            .approve_alert(outcome.alert().id, "committee", None)
            .await
            .unwrap();

        let err = manager
            .reject_alert(outcome.alert().id, "committee", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::AlertAlreadyResolved { .. }));
    }
}
