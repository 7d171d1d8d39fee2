//! Metric observations supplied by the external metric source.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which way a metric moves when a property is deteriorating.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdverseDirection {
    /// Lower values are worse (DSCR, occupancy, NOI).
    Down,
    /// Higher values are worse (expense ratio).
    Up,
}

/// Financial metric tracked per property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    /// Debt Service Coverage Ratio: NOI over annual debt service.
    Dscr,
    /// Occupancy rate, expressed in percent (0–100).
    Occupancy,
    /// Net Operating Income.
    NetOperatingIncome,
    /// Operating expenses over effective gross income.
    ExpenseRatio,
}

impl MetricType {
    /// All metrics the detection cycle evaluates.
    pub const ALL: [MetricType; 4] = [
        MetricType::Dscr,
        MetricType::Occupancy,
        MetricType::NetOperatingIncome,
        MetricType::ExpenseRatio,
    ];

    pub fn adverse_direction(&self) -> AdverseDirection {
        match self {
            MetricType::Dscr | MetricType::Occupancy | MetricType::NetOperatingIncome => {
                AdverseDirection::Down
            }
            MetricType::ExpenseRatio => AdverseDirection::Up,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Dscr => "dscr",
            MetricType::Occupancy => "occupancy",
            MetricType::NetOperatingIncome => "net_operating_income",
            MetricType::ExpenseRatio => "expense_ratio",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One period of a property's metric series.
///
/// Observations are immutable once recorded; the series is append-only
/// and ordered by `period`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub period: NaiveDate,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(period: NaiveDate, value: f64) -> Self {
        Self { period, value }
    }

    /// Non-finite values mark a corrupt observation.
    pub fn is_valid(&self) -> bool {
        self.value.is_finite()
    }
}
