//! Lock queries, summaries, and the expiry sweep.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info};

use parapet_types::{LockSummary, PropertyId, WorkflowAction, WorkflowLock};

use crate::error::GovernanceError;
use crate::store::GovernanceStore;

/// Lock-side read and maintenance operations.
pub struct LockEngine {
    store: Arc<dyn GovernanceStore>,
}

impl LockEngine {
    pub fn new(store: Arc<dyn GovernanceStore>) -> Self {
        Self { store }
    }

    /// Whether any active lock blocks the action. Fails closed: if the
    /// store cannot be read, the action is reported as blocked.
    pub async fn is_action_blocked(&self, property_id: PropertyId, action: WorkflowAction) -> bool {
        match self.store.locks_for_property(property_id).await {
            Ok(locks) => locks.iter().any(|lock| lock.blocks(action)),
            Err(err) => {
                error!(
                    property = %property_id,
                    action = %action,
                    %err,
                    "lock state unreadable, treating action as blocked"
                );
                true
            }
        }
    }

    /// Aggregate view over every lock the property has ever had.
    pub async fn lock_summary(
        &self,
        property_id: PropertyId,
    ) -> Result<LockSummary, GovernanceError> {
        let locks = self.store.locks_for_property(property_id).await?;
        Ok(summarize(&locks))
    }

    /// Expire active locks whose alert has sat unresolved for longer
    /// than `days_threshold`. Returns the locks transitioned.
    pub async fn expire_old_locks(
        &self,
        days_threshold: i64,
    ) -> Result<Vec<WorkflowLock>, GovernanceError> {
        let now = Utc::now();
        let cutoff = now - Duration::days(days_threshold);
        let expired = self.store.expire_locks(cutoff, now).await?;
        for lock in &expired {
            info!(
                lock = %lock.id,
                property = %lock.property_id,
                alert = %lock.alert_id,
                held_hours = lock.duration_hours.unwrap_or_default(),
                "lock expired by sweep"
            );
        }
        Ok(expired)
    }

    pub async fn has_active_alerts(
        &self,
        property_id: PropertyId,
    ) -> Result<bool, GovernanceError> {
        self.store.has_active_alerts(property_id).await
    }
}

fn summarize(locks: &[WorkflowLock]) -> LockSummary {
    let mut summary = LockSummary {
        total: locks.len(),
        ..LockSummary::default()
    };

    let mut durations = vec![];
    for lock in locks {
        if lock.is_locked() {
            summary.active += 1;
            summary.blocked_actions.extend(lock.blocked_actions.iter().copied());
            summary.oldest_lock_date = Some(match summary.oldest_lock_date {
                Some(oldest) => oldest.min(lock.locked_at),
                None => lock.locked_at,
            });
        } else if let Some(hours) = lock.duration_hours {
            durations.push(hours);
        }
    }
    if !durations.is_empty() {
        summary.avg_duration_hours =
            Some(durations.iter().sum::<f64>() / durations.len() as f64);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGovernanceStore;
    use chrono::NaiveDate;
    use parapet_types::{
        AlertEvidence, AlertSeverity, AlertType, CommitteeAlert, DetectionMethod, LockStatus,
        MetricType,
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
                detail: "test".into(),
            }],
        )
    }

    async fn seed_lock(
        store: &MemoryGovernanceStore,
        property: PropertyId,
        alert_type: AlertType,
        locked_days_ago: i64,
    ) -> CommitteeAlert {
        let mut alert = critical_alert(property, alert_type);
        alert.created_at = Utc::now() - Duration::days(locked_days_ago);
        let mut locks: Vec<_> = WorkflowLock::from_alert(&alert).into_iter().collect();
        for lock in &mut locks {
            lock.locked_at = alert.created_at;
        }
        store.create_alert(alert.clone(), locks).await.unwrap();
        alert
    }

    #[tokio::test]
    async fn blocked_action_reflects_lock_type() {
        let store = Arc::new(MemoryGovernanceStore::new());
        let engine = LockEngine::new(store.clone());
        let property = PropertyId::new();
        seed_lock(&store, property, AlertType::OccupancyLow, 0).await;

        assert!(engine.is_action_blocked(property, WorkflowAction::Sell).await);
        assert!(!engine.is_action_blocked(property, WorkflowAction::Refinance).await);
        assert!(!engine
            .is_action_blocked(PropertyId::new(), WorkflowAction::Sell)
            .await);
    }

    #[tokio::test]
    async fn summary_aggregates_active_and_resolved() {
        let store = Arc::new(MemoryGovernanceStore::new());
        let engine = LockEngine::new(store.clone());
        let property = PropertyId::new();

        let resolved = seed_lock(&store, property, AlertType::DscrLow, 10).await;
        store
            .resolve_alert(
                resolved.id,
                parapet_types::AlertStatus::Approved,
                "committee",
                None,
                true,
                "alert approved",
                Utc::now(),
            )
            .await
            .unwrap();
        seed_lock(&store, property, AlertType::OccupancyLow, 2).await;

        let summary = engine.lock_summary(property).await.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.active, 1);
        assert!(summary.blocked_actions.contains(&WorkflowAction::Sell));
        assert!(!summary.blocked_actions.contains(&WorkflowAction::Refinance));
        // Only the resolved lock contributes a duration: about 240 hours.
        let avg = summary.avg_duration_hours.unwrap();
        assert!((avg - 240.0).abs() < 1.0, "avg {avg}");
    }

    #[tokio::test]
    async fn sweep_expires_only_past_threshold() {
        let store = Arc::new(MemoryGovernanceStore::new());
        let engine = LockEngine::new(store.clone());
        let stale = PropertyId::new();
        let fresh = PropertyId::new();
        seed_lock(&store, stale, AlertType::DscrLow, 120).await;
        seed_lock(&store, fresh, AlertType::DscrLow, 10).await;

        let expired = engine.expire_old_locks(90).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].property_id, stale);
        assert_eq!(expired[0].status, LockStatus::Expired);
        assert!(!engine.has_active_alerts(stale).await.unwrap());
        assert!(engine.has_active_alerts(fresh).await.unwrap());
    }
}
