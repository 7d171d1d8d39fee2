//! PostgreSQL governance store.
//!
//! Each trait method runs in one transaction. Open-alert uniqueness is
//! enforced by a partial unique index on (property_id, alert_type)
//! WHERE status = 'pending'; a unique violation on insert is the normal
//! duplicate path, not an error.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use parapet_types::{
    AlertEvidence, AlertId, AlertSeverity, AlertStatus, AlertType, CommitteeAlert, LockId,
    LockStatus, LockType, PropertyId, WorkflowLock,
};

use crate::error::GovernanceError;

use super::{AlertResolution, AlertWrite, GovernanceStore};

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed implementation of [`GovernanceStore`].
#[derive(Clone, Debug)]
pub struct PostgresGovernanceStore {
    pool: PgPool,
}

impl PostgresGovernanceStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, GovernanceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| GovernanceError::StoreUnavailable(format!("postgres connect: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), GovernanceError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS parapet_alerts (
                id UUID PRIMARY KEY,
                property_id UUID NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                evidence JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                resolved_at TIMESTAMPTZ NULL,
                resolved_by TEXT NULL,
                resolution_notes TEXT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        // One pending alert per (property, alert type); the partial index
        // lets any number of resolved rows coexist.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_parapet_alerts_open
            ON parapet_alerts (property_id, alert_type)
            WHERE status = 'pending'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS parapet_locks (
                id UUID PRIMARY KEY,
                property_id UUID NOT NULL,
                alert_id UUID NOT NULL REFERENCES parapet_alerts (id),
                lock_type TEXT NOT NULL,
                blocked_actions JSONB NOT NULL,
                status TEXT NOT NULL,
                locked_at TIMESTAMPTZ NOT NULL,
                unlocked_at TIMESTAMPTZ NULL,
                unlocked_by TEXT NULL,
                unlock_reason TEXT NULL,
                duration_hours DOUBLE PRECISION NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_parapet_locks_property ON parapet_locks (property_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_parapet_locks_alert ON parapet_locks (alert_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS parapet_property_flags (
                property_id UUID PRIMARY KEY,
                has_active_alerts BOOLEAN NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn fetch_alert_tx(
        tx: &mut Transaction<'_, Postgres>,
        alert_id: AlertId,
    ) -> Result<Option<CommitteeAlert>, GovernanceError> {
        let row = sqlx::query("SELECT * FROM parapet_alerts WHERE id = $1 FOR UPDATE")
            .bind(alert_id.0)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(row_to_alert).transpose()
    }

    async fn insert_locks_tx(
        tx: &mut Transaction<'_, Postgres>,
        locks: &[WorkflowLock],
    ) -> Result<(), GovernanceError> {
        for lock in locks {
            let blocked = serde_json::to_value(&lock.blocked_actions)
                .map_err(|e| GovernanceError::Storage(format!("encode blocked_actions: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO parapet_locks (
                    id, property_id, alert_id, lock_type, blocked_actions,
                    status, locked_at, unlocked_at, unlocked_by,
                    unlock_reason, duration_hours
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(lock.id.0)
            .bind(lock.property_id.0)
            .bind(lock.alert_id.0)
            .bind(lock.lock_type.as_str())
            .bind(blocked)
            .bind(lock.status.as_str())
            .bind(lock.locked_at)
            .bind(lock.unlocked_at)
            .bind(lock.unlocked_by.as_deref())
            .bind(lock.unlock_reason.as_deref())
            .bind(lock.duration_hours)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx)?;
        }
        Ok(())
    }

    /// Upsert the derived flag from lock rows, inside the same
    /// transaction as the lock mutation.
    async fn sync_flag_tx(
        tx: &mut Transaction<'_, Postgres>,
        property_id: Uuid,
    ) -> Result<(), GovernanceError> {
        sqlx::query(
            r#"
            INSERT INTO parapet_property_flags (property_id, has_active_alerts, updated_at)
            SELECT
                $1,
                EXISTS (
                    SELECT 1 FROM parapet_locks
                    WHERE property_id = $1 AND status = 'locked'
                ),
                NOW()
            ON CONFLICT (property_id) DO UPDATE
            SET has_active_alerts = EXCLUDED.has_active_alerts,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(property_id)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl GovernanceStore for PostgresGovernanceStore {
    async fn create_alert(
        &self,
        alert: CommitteeAlert,
        locks: Vec<WorkflowLock>,
    ) -> Result<AlertWrite, GovernanceError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let evidence = serde_json::to_value(&alert.evidence)
            .map_err(|e| GovernanceError::Storage(format!("encode evidence: {e}")))?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO parapet_alerts (
                id, property_id, alert_type, severity, status, evidence,
                created_at, resolved_at, resolved_by, resolution_notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(alert.id.0)
        .bind(alert.property_id.0)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.status.as_str())
        .bind(evidence)
        .bind(alert.created_at)
        .bind(alert.resolved_at)
        .bind(alert.resolved_by.as_deref())
        .bind(alert.resolution_notes.as_deref())
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                tx.rollback().await.map_err(map_sqlx)?;
                let row = sqlx::query(
                    r#"
                    SELECT * FROM parapet_alerts
                    WHERE property_id = $1 AND alert_type = $2 AND status = 'pending'
                    "#,
                )
                .bind(alert.property_id.0)
                .bind(alert.alert_type.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
                return Ok(AlertWrite::DuplicatePending(row_to_alert(&row)?));
            }
            return Err(map_sqlx(err));
        }

        Self::insert_locks_tx(&mut tx, &locks).await?;
        Self::sync_flag_tx(&mut tx, alert.property_id.0).await?;
        tx.commit().await.map_err(map_sqlx)?;
        Ok(AlertWrite::Created(alert))
    }

    async fn escalate_alert(
        &self,
        alert_id: AlertId,
        severity: AlertSeverity,
        evidence: Vec<AlertEvidence>,
        locks: Vec<WorkflowLock>,
    ) -> Result<CommitteeAlert, GovernanceError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let mut alert = Self::fetch_alert_tx(&mut tx, alert_id)
            .await?
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

        let encoded = serde_json::to_value(&alert.evidence)
            .map_err(|e| GovernanceError::Storage(format!("encode evidence: {e}")))?;
        sqlx::query("UPDATE parapet_alerts SET severity = $2, evidence = $3 WHERE id = $1")
            .bind(alert_id.0)
            .bind(alert.severity.as_str())
            .bind(encoded)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let existing: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM parapet_locks WHERE alert_id = $1")
                .bind(alert_id.0)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx)?
                .try_get("n")
                .map_err(map_sqlx)?;
        if existing == 0 && !locks.is_empty() {
            Self::insert_locks_tx(&mut tx, &locks).await?;
            Self::sync_flag_tx(&mut tx, alert.property_id.0).await?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(alert)
    }

    async fn get_alert(
        &self,
        alert_id: AlertId,
    ) -> Result<Option<CommitteeAlert>, GovernanceError> {
        let row = sqlx::query("SELECT * FROM parapet_alerts WHERE id = $1")
            .bind(alert_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(row_to_alert).transpose()
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
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let mut alert = Self::fetch_alert_tx(&mut tx, alert_id)
            .await?
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

        sqlx::query(
            r#"
            UPDATE parapet_alerts
            SET status = $2, resolved_at = $3, resolved_by = $4, resolution_notes = $5
            WHERE id = $1
            "#,
        )
        .bind(alert_id.0)
        .bind(status.as_str())
        .bind(now)
        .bind(user)
        .bind(notes)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let mut released = vec![];
        if unlock {
            let rows = sqlx::query(
                r#"
                UPDATE parapet_locks
                SET status = 'unlocked',
                    unlocked_at = GREATEST($2, locked_at),
                    unlocked_by = $3,
                    unlock_reason = $4,
                    duration_hours =
                        EXTRACT(EPOCH FROM (GREATEST($2, locked_at) - locked_at)) / 3600.0
                WHERE alert_id = $1 AND status = 'locked'
                RETURNING *
                "#,
            )
            .bind(alert_id.0)
            .bind(now)
            .bind(user)
            .bind(unlock_reason)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            for row in &rows {
                released.push(row_to_lock(row)?);
            }
        }

        Self::sync_flag_tx(&mut tx, alert.property_id.0).await?;
        tx.commit().await.map_err(map_sqlx)?;

        Ok(AlertResolution {
            alert,
            released_locks: released,
        })
    }

    async fn locks_for_alert(
        &self,
        alert_id: AlertId,
    ) -> Result<Vec<WorkflowLock>, GovernanceError> {
        let rows = sqlx::query(
            "SELECT * FROM parapet_locks WHERE alert_id = $1 ORDER BY locked_at ASC",
        )
        .bind(alert_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(row_to_lock).collect()
    }

    async fn locks_for_property(
        &self,
        property_id: PropertyId,
    ) -> Result<Vec<WorkflowLock>, GovernanceError> {
        let rows = sqlx::query(
            "SELECT * FROM parapet_locks WHERE property_id = $1 ORDER BY locked_at ASC",
        )
        .bind(property_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        rows.iter().map(row_to_lock).collect()
    }

    async fn expire_locks(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkflowLock>, GovernanceError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let rows = sqlx::query(
            r#"
            UPDATE parapet_locks
            SET status = 'expired',
                unlocked_at = GREATEST($2, locked_at),
                unlock_reason = 'expired by governance sweep',
                duration_hours =
                    EXTRACT(EPOCH FROM (GREATEST($2, locked_at) - locked_at)) / 3600.0
            WHERE status = 'locked'
              AND locked_at < $1
            RETURNING *
            "#,
        )
        .bind(cutoff)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in &rows {
            expired.push(row_to_lock(row)?);
        }

        let mut touched: Vec<Uuid> = expired.iter().map(|l| l.property_id.0).collect();
        touched.sort();
        touched.dedup();
        for property_id in touched {
            Self::sync_flag_tx(&mut tx, property_id).await?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(expired)
    }

    async fn has_active_alerts(&self, property_id: PropertyId) -> Result<bool, GovernanceError> {
        let row = sqlx::query(
            "SELECT has_active_alerts FROM parapet_property_flags WHERE property_id = $1",
        )
        .bind(property_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        match row {
            Some(row) => row.try_get("has_active_alerts").map_err(map_sqlx),
            None => Ok(false),
        }
    }
}

// ── Row decoding ────────────────────────────────────────────────────────

fn row_to_alert(row: &PgRow) -> Result<CommitteeAlert, GovernanceError> {
    let evidence: serde_json::Value = row.try_get("evidence").map_err(map_sqlx)?;
    let evidence: Vec<AlertEvidence> = serde_json::from_value(evidence)
        .map_err(|e| GovernanceError::Storage(format!("decode evidence: {e}")))?;
    let alert_type: String = row.try_get("alert_type").map_err(map_sqlx)?;
    let severity: String = row.try_get("severity").map_err(map_sqlx)?;
    let status: String = row.try_get("status").map_err(map_sqlx)?;

    Ok(CommitteeAlert {
        id: AlertId(row.try_get("id").map_err(map_sqlx)?),
        property_id: PropertyId(row.try_get("property_id").map_err(map_sqlx)?),
        alert_type: parse_alert_type(&alert_type)?,
        severity: parse_severity(&severity)?,
        status: parse_status(&status)?,
        evidence,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        resolved_at: row.try_get("resolved_at").map_err(map_sqlx)?,
        resolved_by: row.try_get("resolved_by").map_err(map_sqlx)?,
        resolution_notes: row.try_get("resolution_notes").map_err(map_sqlx)?,
    })
}

fn row_to_lock(row: &PgRow) -> Result<WorkflowLock, GovernanceError> {
    let blocked: serde_json::Value = row.try_get("blocked_actions").map_err(map_sqlx)?;
    let blocked = serde_json::from_value(blocked)
        .map_err(|e| GovernanceError::Storage(format!("decode blocked_actions: {e}")))?;
    let lock_type: String = row.try_get("lock_type").map_err(map_sqlx)?;
    let status: String = row.try_get("status").map_err(map_sqlx)?;

    Ok(WorkflowLock {
        id: LockId(row.try_get("id").map_err(map_sqlx)?),
        property_id: PropertyId(row.try_get("property_id").map_err(map_sqlx)?),
        alert_id: AlertId(row.try_get("alert_id").map_err(map_sqlx)?),
        lock_type: parse_lock_type(&lock_type)?,
        blocked_actions: blocked,
        status: parse_lock_status(&status)?,
        locked_at: row.try_get("locked_at").map_err(map_sqlx)?,
        unlocked_at: row.try_get("unlocked_at").map_err(map_sqlx)?,
        unlocked_by: row.try_get("unlocked_by").map_err(map_sqlx)?,
        unlock_reason: row.try_get("unlock_reason").map_err(map_sqlx)?,
        duration_hours: row.try_get("duration_hours").map_err(map_sqlx)?,
    })
}

fn parse_alert_type(value: &str) -> Result<AlertType, GovernanceError> {
    match value {
        "dscr_low" => Ok(AlertType::DscrLow),
        "occupancy_low" => Ok(AlertType::OccupancyLow),
        "noi_drift" => Ok(AlertType::NoiDrift),
        "expense_spike" => Ok(AlertType::ExpenseSpike),
        other => Err(GovernanceError::Storage(format!(
            "unknown alert type '{other}' in storage"
        ))),
    }
}

fn parse_severity(value: &str) -> Result<AlertSeverity, GovernanceError> {
    match value {
        "warning" => Ok(AlertSeverity::Warning),
        "critical" => Ok(AlertSeverity::Critical),
        other => Err(GovernanceError::Storage(format!(
            "unknown severity '{other}' in storage"
        ))),
    }
}

fn parse_status(value: &str) -> Result<AlertStatus, GovernanceError> {
    match value {
        "pending" => Ok(AlertStatus::Pending),
        "approved" => Ok(AlertStatus::Approved),
        "rejected" => Ok(AlertStatus::Rejected),
        other => Err(GovernanceError::Storage(format!(
            "unknown alert status '{other}' in storage"
        ))),
    }
}

fn parse_lock_type(value: &str) -> Result<LockType, GovernanceError> {
    match value {
        "credit_freeze" => Ok(LockType::CreditFreeze),
        "occupancy_freeze" => Ok(LockType::OccupancyFreeze),
        "disposition_freeze" => Ok(LockType::DispositionFreeze),
        other => Err(GovernanceError::Storage(format!(
            "unknown lock type '{other}' in storage"
        ))),
    }
}

fn parse_lock_status(value: &str) -> Result<LockStatus, GovernanceError> {
    match value {
        "locked" => Ok(LockStatus::Locked),
        "unlocked" => Ok(LockStatus::Unlocked),
        "expired" => Ok(LockStatus::Expired),
        other => Err(GovernanceError::Storage(format!(
            "unknown lock status '{other}' in storage"
        ))),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

fn map_sqlx(err: sqlx::Error) -> GovernanceError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            GovernanceError::StoreUnavailable(err.to_string())
        }
        other => GovernanceError::Storage(other.to_string()),
    }
}
