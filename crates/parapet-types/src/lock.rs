//! Workflow locks: governance records blocking high-risk actions on a
//! property until the triggering alert is resolved.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::{AlertSeverity, CommitteeAlert};
use crate::ids::{AlertId, LockId, PropertyId};

// ── Actions ─────────────────────────────────────────────────────────────

/// High-risk workflow actions the gate can block.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum WorkflowAction {
    Refinance,
    Sell,
    Dispose,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::Refinance => "refinance",
            WorkflowAction::Sell => "sell",
            WorkflowAction::Dispose => "dispose",
        }
    }

    /// Parse an externally supplied action name. Callers map `None` to an
    /// invalid-action error; the gate never guesses.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "refinance" => Some(WorkflowAction::Refinance),
            "sell" | "sale" => Some(WorkflowAction::Sell),
            "dispose" | "disposition" => Some(WorkflowAction::Dispose),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Lock type ───────────────────────────────────────────────────────────

/// Category of a workflow lock, derived from the triggering alert type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockType {
    /// Credit condition: blocks refinance, sell, and dispose.
    CreditFreeze,
    /// Occupancy condition: blocks sell and dispose.
    OccupancyFreeze,
    /// Any other critical condition: blocks dispose only.
    DispositionFreeze,
}

impl LockType {
    /// The fixed action set this lock category blocks.
    pub fn blocked_actions(&self) -> BTreeSet<WorkflowAction> {
        let actions: &[WorkflowAction] = match self {
            LockType::CreditFreeze => &[
                WorkflowAction::Refinance,
                WorkflowAction::Sell,
                WorkflowAction::Dispose,
            ],
            LockType::OccupancyFreeze => &[WorkflowAction::Sell, WorkflowAction::Dispose],
            LockType::DispositionFreeze => &[WorkflowAction::Dispose],
        };
        actions.iter().copied().collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::CreditFreeze => "credit_freeze",
            LockType::OccupancyFreeze => "occupancy_freeze",
            LockType::DispositionFreeze => "disposition_freeze",
        }
    }
}

impl std::fmt::Display for LockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Lock status ─────────────────────────────────────────────────────────

/// State of a workflow lock. `Locked` is the only non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockStatus {
    Locked,
    Unlocked,
    Expired,
}

impl LockStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LockStatus::Locked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Locked => "locked",
            LockStatus::Unlocked => "unlocked",
            LockStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Workflow lock ───────────────────────────────────────────────────────

/// A governance record blocking specific actions on one property,
/// referencing exactly one alert. Never deleted; resolution and expiry
/// are terminal transitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowLock {
    pub id: LockId,
    pub property_id: PropertyId,
    pub alert_id: AlertId,
    pub lock_type: LockType,
    pub blocked_actions: BTreeSet<WorkflowAction>,
    pub status: LockStatus,
    pub locked_at: DateTime<Utc>,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub unlocked_by: Option<String>,
    pub unlock_reason: Option<String>,
    /// Computed once, at the locked→unlocked/expired transition.
    pub duration_hours: Option<f64>,
}

impl WorkflowLock {
    /// Derive the lock for a critical alert. Warning alerts are advisory
    /// only and never produce locks.
    pub fn from_alert(alert: &CommitteeAlert) -> Option<Self> {
        if alert.severity != AlertSeverity::Critical {
            return None;
        }
        let lock_type = match alert.alert_type {
            crate::alert::AlertType::DscrLow => LockType::CreditFreeze,
            crate::alert::AlertType::OccupancyLow => LockType::OccupancyFreeze,
            _ => LockType::DispositionFreeze,
        };
        Some(Self {
            id: LockId::new(),
            property_id: alert.property_id,
            alert_id: alert.id,
            lock_type,
            blocked_actions: lock_type.blocked_actions(),
            status: LockStatus::Locked,
            locked_at: Utc::now(),
            unlocked_at: None,
            unlocked_by: None,
            unlock_reason: None,
            duration_hours: None,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.status == LockStatus::Locked
    }

    pub fn blocks(&self, action: WorkflowAction) -> bool {
        self.is_locked() && self.blocked_actions.contains(&action)
    }
}

// ── Summary ─────────────────────────────────────────────────────────────

/// Aggregate lock view for one property.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LockSummary {
    pub total: usize,
    pub active: usize,
    /// Union of blocked actions across currently locked locks.
    pub blocked_actions: BTreeSet<WorkflowAction>,
    pub oldest_lock_date: Option<DateTime<Utc>>,
    /// Mean duration of resolved (unlocked or expired) locks.
    pub avg_duration_hours: Option<f64>,
}
