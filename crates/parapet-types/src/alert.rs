//! Committee alerts: risk signals requiring human review.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AlertId, PropertyId};
use crate::metric::MetricType;

// ── Severity ────────────────────────────────────────────────────────────

/// Severity of a committee alert.
///
/// Ordering matters: escalation only ever moves severity upward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertSeverity {
    /// Advisory only; never produces workflow locks.
    Warning,
    /// Blocks high-risk workflow actions until resolved.
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Status ──────────────────────────────────────────────────────────────

/// Review state of a committee alert.
///
/// `Pending` is the only non-terminal state; approved and rejected alerts
/// are never reopened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertStatus {
    Pending,
    Approved,
    Rejected,
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AlertStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Approved => "approved",
            AlertStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Alert type ──────────────────────────────────────────────────────────

/// What condition the alert reports.
///
/// At most one `Pending` alert may exist per (property, alert type).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    DscrLow,
    OccupancyLow,
    NoiDrift,
    ExpenseSpike,
}

impl AlertType {
    /// The alert type raised by an adverse move in the given metric.
    pub fn for_metric(metric: MetricType) -> Self {
        match metric {
            MetricType::Dscr => AlertType::DscrLow,
            MetricType::Occupancy => AlertType::OccupancyLow,
            MetricType::NetOperatingIncome => AlertType::NoiDrift,
            MetricType::ExpenseRatio => AlertType::ExpenseSpike,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::DscrLow => "dscr_low",
            AlertType::OccupancyLow => "occupancy_low",
            AlertType::NoiDrift => "noi_drift",
            AlertType::ExpenseSpike => "expense_spike",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Evidence ────────────────────────────────────────────────────────────

/// How a signal was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionMethod {
    /// Static rule table on the latest snapshot.
    StaticThreshold,
    /// Rolling Z-score against a trailing window.
    ZScore,
    /// Cumulative-sum drift detection.
    Cusum,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::StaticThreshold => "static_threshold",
            DetectionMethod::ZScore => "z_score",
            DetectionMethod::Cusum => "cusum",
        }
    }
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One piece of evidence attached to an alert.
///
/// Evidence is append-only: each detection cycle that re-confirms an open
/// alert appends the latest observation rather than overwriting history,
/// so the committee sees how the condition developed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertEvidence {
    pub metric: MetricType,
    pub observed: f64,
    pub period: NaiveDate,
    pub method: DetectionMethod,
    /// Detection score (Z-score or CUSUM accumulator in std-dev units);
    /// absent for static threshold breaches.
    pub score: Option<f64>,
    /// Rolling baseline mean at detection time, where applicable.
    pub baseline_mean: Option<f64>,
    /// The static threshold that was breached, where applicable.
    pub threshold: Option<f64>,
    pub detail: String,
}

// ── Committee alert ─────────────────────────────────────────────────────

/// A risk signal requiring committee review before normal operation
/// resumes on the property.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitteeAlert {
    pub id: AlertId,
    pub property_id: PropertyId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub evidence: Vec<AlertEvidence>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
}

impl CommitteeAlert {
    /// Build a new pending alert with its initial evidence entries.
    pub fn new(
        property_id: PropertyId,
        alert_type: AlertType,
        severity: AlertSeverity,
        evidence: Vec<AlertEvidence>,
    ) -> Self {
        Self {
            id: AlertId::new(),
            property_id,
            alert_type,
            severity,
            status: AlertStatus::Pending,
            evidence,
            created_at: Utc::now(),
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == AlertStatus::Pending
    }

    /// Content digest over the evidence list, recorded at resolution time
    /// so the audit trail pins exactly what the committee reviewed.
    pub fn evidence_digest(&self) -> String {
        let serialized = serde_json::to_vec(&self.evidence).unwrap_or_default();
        blake3::hash(&serialized).to_hex().to_string()
    }
}
