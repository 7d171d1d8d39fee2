//! Static threshold rule table.

use parapet_types::{AdverseDirection, AlertSeverity, MetricPoint, MetricType};

/// A static breach of the governance rule table.
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdBreach {
    pub metric: MetricType,
    pub severity: AlertSeverity,
    pub observed: f64,
    /// The bound that was breached.
    pub threshold: f64,
    pub detail: String,
}

#[derive(Clone, Copy, Debug)]
struct ThresholdRule {
    metric: MetricType,
    critical: f64,
    warning: f64,
}

/// Pure, stateless rule table classifying the latest metric snapshot.
///
/// Metrics without a rule (NOI, expense ratio) are covered only by the
/// statistical detector. The same input always yields the same tier.
#[derive(Clone, Debug)]
pub struct ThresholdTable {
    rules: Vec<ThresholdRule>,
}

impl ThresholdTable {
    /// The fixed governance rule table:
    ///
    /// | Metric    | Critical | Warning |
    /// |-----------|----------|---------|
    /// | DSCR      | < 1.25   | < 1.30  |
    /// | Occupancy | < 80%    | < 85%   |
    pub fn standard() -> Self {
        Self {
            rules: vec![
                ThresholdRule {
                    metric: MetricType::Dscr,
                    critical: 1.25,
                    warning: 1.30,
                },
                ThresholdRule {
                    metric: MetricType::Occupancy,
                    critical: 80.0,
                    warning: 85.0,
                },
            ],
        }
    }

    /// Classify the latest snapshot of one metric.
    pub fn evaluate(&self, metric: MetricType, latest: &MetricPoint) -> Option<ThresholdBreach> {
        let rule = self.rules.iter().find(|r| r.metric == metric)?;
        let value = latest.value;

        // Rules are only defined for metrics whose adverse direction is
        // down; the breach comparison reflects that.
        debug_assert_eq!(metric.adverse_direction(), AdverseDirection::Down);

        let (severity, threshold) = if value < rule.critical {
            (AlertSeverity::Critical, rule.critical)
        } else if value < rule.warning {
            (AlertSeverity::Warning, rule.warning)
        } else {
            return None;
        };

        Some(ThresholdBreach {
            metric,
            severity,
            observed: value,
            threshold,
            detail: format!(
                "{} {:.2} below {} threshold {:.2}",
                metric, value, severity, threshold
            ),
        })
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::standard()
    }
}
