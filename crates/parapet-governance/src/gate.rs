//! The action gate: the synchronous yes/no checkpoint workflow systems
//! call before executing a high-risk action.

use std::sync::Arc;

use tracing::{error, info, warn};

use parapet_types::{AlertId, LockStatus, PropertyId, WorkflowAction};

use crate::error::GovernanceError;
use crate::store::GovernanceStore;

/// The gate's verdict on one proposed action.
#[derive(Clone, Debug)]
pub struct ActionDecision {
    pub allowed: bool,
    /// Alerts whose locks block the action, for routing the caller to
    /// the committee queue.
    pub blocking_alerts: Vec<AlertId>,
    /// One human-readable reason per blocking condition.
    pub reasons: Vec<String>,
    /// Non-blocking notes, e.g. locks that lapsed by expiry rather than
    /// committee review.
    pub advisories: Vec<String>,
}

impl ActionDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            blocking_alerts: vec![],
            reasons: vec![],
            advisories: vec![],
        }
    }
}

/// Fail-closed gate over the governance store.
///
/// Unknown actions are errors, not allowed-by-default. An unreadable
/// store blocks the action rather than letting it through unchecked.
pub struct ActionGate {
    store: Arc<dyn GovernanceStore>,
}

impl ActionGate {
    pub fn new(store: Arc<dyn GovernanceStore>) -> Self {
        Self { store }
    }

    pub async fn check_action(
        &self,
        property_id: PropertyId,
        action: &str,
    ) -> Result<ActionDecision, GovernanceError> {
        let Some(action) = WorkflowAction::parse(action) else {
            warn!(property = %property_id, action, "rejecting unknown workflow action");
            return Err(GovernanceError::InvalidAction(action.to_string()));
        };

        let locks = match self.store.locks_for_property(property_id).await {
            Ok(locks) => locks,
            Err(err) if err.fails_closed() => {
                error!(property = %property_id, %action, %err, "gate failing closed");
                return Ok(Self::blocked_unavailable());
            }
            Err(err) => return Err(err),
        };

        let mut decision = ActionDecision::allowed();
        for lock in &locks {
            if lock.blocks(action) {
                let detail = match self.store.get_alert(lock.alert_id).await {
                    Ok(Some(alert)) => {
                        let latest = alert
                            .evidence
                            .last()
                            .map(|e| e.detail.clone())
                            .unwrap_or_default();
                        format!(
                            "{} blocked by {} lock for {} ({}): {}",
                            action, lock.lock_type, alert.alert_type, alert.id, latest
                        )
                    }
                    Ok(None) => {
                        format!("{} blocked by {} lock ({})", action, lock.lock_type, lock.id)
                    }
                    Err(err) if err.fails_closed() => {
                        error!(property = %property_id, %action, %err, "gate failing closed");
                        return Ok(Self::blocked_unavailable());
                    }
                    Err(err) => return Err(err),
                };
                decision.allowed = false;
                decision.blocking_alerts.push(lock.alert_id);
                decision.reasons.push(detail);
            } else if lock.status == LockStatus::Expired && lock.blocked_actions.contains(&action)
            {
                decision.advisories.push(format!(
                    "a {} lock covering {} lapsed by expiry sweep on {}",
                    lock.lock_type,
                    action,
                    lock.unlocked_at
                        .map(|t| t.date_naive().to_string())
                        .unwrap_or_else(|| "unknown date".to_string()),
                ));
            }
        }

        info!(
            property = %property_id,
            %action,
            allowed = decision.allowed,
            blocking = decision.blocking_alerts.len(),
            "gate decision"
        );
        Ok(decision)
    }

    fn blocked_unavailable() -> ActionDecision {
        ActionDecision {
            allowed: false,
            blocking_alerts: vec![],
            reasons: vec!["governance store unavailable".to_string()],
            advisories: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AlertResolution, AlertWrite, MemoryGovernanceStore};
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};
    use parapet_types::{
        AlertEvidence, AlertSeverity, AlertStatus, AlertType, CommitteeAlert, DetectionMethod,
        MetricType, WorkflowLock,
    };

    fn critical_alert(property_id: PropertyId, alert_type: AlertType) -> CommitteeAlert {
        CommitteeAlert::new(
            property_id,
            alert_type,
            AlertSeverity::Critical,
            vec![AlertEvidence {
                metric: MetricType::Dscr,
                observed: 1.10,
                period: NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
                method: DetectionMethod::StaticThreshold,
                score: None,
                baseline_mean: None,
                threshold: Some(1.25),
                detail: "dscr 1.10 below critical threshold 1.25".into(),
            }],
        )
    }

    #[tokio::test]
    async fn clean_property_passes() {
        let store = Arc::new(MemoryGovernanceStore::new());
        let gate = ActionGate::new(store);
        let decision = gate
            .check_action(PropertyId::new(), "refinance")
            .await
            .unwrap();
        assert!(decision.allowed);
        assert!(decision.reasons.is_empty());
    }

    #[tokio::test]
    async fn locked_property_blocks_with_named_alert() {
        let store = Arc::new(MemoryGovernanceStore::new());
        let property = PropertyId::new();
        let alert = critical_alert(property, AlertType::DscrLow);
        let locks: Vec<_> = WorkflowLock::from_alert(&alert).into_iter().collect();
        store.create_alert(alert.clone(), locks).await.unwrap();

        let gate = ActionGate::new(store);
        let decision = gate.check_action(property, "refinance").await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.blocking_alerts, vec![alert.id]);
        assert!(decision.reasons[0].contains("dscr_low"));
        assert!(decision.reasons[0].contains("below critical threshold"));
    }

    #[tokio::test]
    async fn action_aliases_resolve_before_checking() {
        let store = Arc::new(MemoryGovernanceStore::new());
        let property = PropertyId::new();
        let alert = critical_alert(property, AlertType::OccupancyLow);
        let locks: Vec<_> = WorkflowLock::from_alert(&alert).into_iter().collect();
        store.create_alert(alert, locks).await.unwrap();

        let gate = ActionGate::new(store);
        // Occupancy freeze spares refinance, blocks sale/disposition.
        assert!(gate.check_action(property, "refinance").await.unwrap().allowed);
        assert!(!gate.check_action(property, "sale").await.unwrap().allowed);
        assert!(!gate.check_action(property, "Disposition").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let store = Arc::new(MemoryGovernanceStore::new());
        let gate = ActionGate::new(store);
        let err = gate
            .check_action(PropertyId::new(), "demolish")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidAction(_)));
    }

    #[tokio::test]
    async fn expired_lock_surfaces_as_advisory() {
        let store = Arc::new(MemoryGovernanceStore::new());
        let property = PropertyId::new();
        let mut alert = critical_alert(property, AlertType::DscrLow);
        alert.created_at = Utc::now() - chrono::Duration::days(120);
        let mut locks: Vec<_> = WorkflowLock::from_alert(&alert).into_iter().collect();
        for lock in &mut locks {
            lock.locked_at = alert.created_at;
        }
        store.create_alert(alert, locks).await.unwrap();
        store
            .expire_locks(Utc::now() - chrono::Duration::days(90), Utc::now())
            .await
            .unwrap();

        let gate = ActionGate::new(store);
        let decision = gate.check_action(property, "refinance").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.advisories.len(), 1);
        assert!(decision.advisories[0].contains("lapsed by expiry sweep"));
    }

    struct DownStore;

    #[async_trait]
    impl GovernanceStore for DownStore {
        async fn create_alert(
            &self,
            _alert: CommitteeAlert,
            _locks: Vec<WorkflowLock>,
        ) -> Result<AlertWrite, GovernanceError> {
            Err(GovernanceError::StoreUnavailable("down".into()))
        }
        async fn escalate_alert(
            &self,
            _alert_id: AlertId,
            _severity: AlertSeverity,
            _evidence: Vec<AlertEvidence>,
            _locks: Vec<WorkflowLock>,
        ) -> Result<CommitteeAlert, GovernanceError> {
            Err(GovernanceError::StoreUnavailable("down".into()))
        }
        async fn get_alert(
            &self,
            _alert_id: AlertId,
        ) -> Result<Option<CommitteeAlert>, GovernanceError> {
            Err(GovernanceError::StoreUnavailable("down".into()))
        }
        #[allow(clippy::too_many_arguments)]
        async fn resolve_alert(
            &self,
            _alert_id: AlertId,
            _status: AlertStatus,
            _user: &str,
            _notes: Option<&str>,
            _unlock: bool,
            _unlock_reason: &str,
            _now: DateTime<Utc>,
        ) -> Result<AlertResolution, GovernanceError> {
            Err(GovernanceError::StoreUnavailable("down".into()))
        }
        async fn locks_for_alert(
            &self,
            _alert_id: AlertId,
        ) -> Result<Vec<WorkflowLock>, GovernanceError> {
            Err(GovernanceError::StoreUnavailable("down".into()))
        }
        async fn locks_for_property(
            &self,
            _property_id: PropertyId,
        ) -> Result<Vec<WorkflowLock>, GovernanceError> {
            Err(GovernanceError::StoreUnavailable("down".into()))
        }
        async fn expire_locks(
            &self,
            _cutoff: DateTime<Utc>,
            _now: DateTime<Utc>,
        ) -> Result<Vec<WorkflowLock>, GovernanceError> {
            Err(GovernanceError::StoreUnavailable("down".into()))
        }
        async fn has_active_alerts(
            &self,
            _property_id: PropertyId,
        ) -> Result<bool, GovernanceError> {
            Err(GovernanceError::StoreUnavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_store_fails_closed() {
        let gate = ActionGate::new(Arc::new(DownStore));
        let decision = gate
            .check_action(PropertyId::new(), "refinance")
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reasons, vec!["governance store unavailable"]);
    }
}
