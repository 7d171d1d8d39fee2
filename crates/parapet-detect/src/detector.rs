//! Anomaly detection algorithms and their orchestrator.
//!
//! Provides:
//! - `SignalAlgorithm` trait for pluggable detection over a metric series
//! - `ZScoreSignal`: point-in-time deviation from a rolling baseline
//! - `CusumSignal`: cumulative-sum detection of sustained drift
//! - `AnomalyDetector` that runs all algorithms and keeps only the
//!   adverse-direction signals that warrant a committee alert

use chrono::NaiveDate;
use tracing::{debug, warn};

use parapet_types::{
    AdverseDirection, AlertEvidence, AlertSeverity, AlertType, DetectionMethod, MetricPoint,
    MetricType, PropertyId,
};

use crate::config::DetectorConfig;

/// Std-dev floor below which a history is treated as constant.
const STD_FLOOR: f64 = 1e-9;

// ── Signals ─────────────────────────────────────────────────────────────

/// Which way the anomalous observation moved relative to its baseline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalDirection {
    Up,
    Down,
}

impl SignalDirection {
    fn is_adverse_for(&self, metric: MetricType) -> bool {
        match metric.adverse_direction() {
            AdverseDirection::Down => *self == SignalDirection::Down,
            AdverseDirection::Up => *self == SignalDirection::Up,
        }
    }
}

/// Intermediate signal from a single algorithm, before direction
/// filtering.
#[derive(Clone, Debug)]
pub struct RawSignal {
    pub method: DetectionMethod,
    pub direction: SignalDirection,
    /// Detection score in std-dev units.
    pub score: f64,
    pub baseline_mean: f64,
    pub detail: String,
}

/// A candidate anomaly event routed to the alert manager.
#[derive(Clone, Debug)]
pub struct AnomalySignal {
    pub property_id: PropertyId,
    pub metric: MetricType,
    pub observed: f64,
    pub period: NaiveDate,
    pub method: DetectionMethod,
    pub score: f64,
    pub baseline_mean: f64,
    pub severity: AlertSeverity,
    pub detail: String,
}

impl AnomalySignal {
    pub fn alert_type(&self) -> AlertType {
        AlertType::for_metric(self.metric)
    }

    pub fn to_evidence(&self) -> AlertEvidence {
        AlertEvidence {
            metric: self.metric,
            observed: self.observed,
            period: self.period,
            method: self.method,
            score: Some(self.score),
            baseline_mean: Some(self.baseline_mean),
            threshold: None,
            detail: self.detail.clone(),
        }
    }
}

// ── Trait ───────────────────────────────────────────────────────────────

/// Pluggable detection algorithm over an ordered metric series.
///
/// The slice is ordered oldest first and contains only finite values;
/// the last element is the observation under test.
pub trait SignalAlgorithm: Send + Sync {
    fn evaluate(&self, points: &[MetricPoint]) -> Vec<RawSignal>;

    /// Name of this algorithm (for logging and provenance).
    fn name(&self) -> &'static str;
}

// ── Z-score ─────────────────────────────────────────────────────────────

/// Rolling Z-score detection.
///
/// Compares the latest observation against the mean/std of a trailing
/// window that excludes it. A near-constant history falls back to the
/// epsilon rule: any deviation beyond `epsilon` from the constant is
/// anomalous, anything within it is noise.
pub struct ZScoreSignal {
    pub window: usize,
    pub threshold: f64,
    pub epsilon: f64,
}

impl ZScoreSignal {
    pub fn new(window: usize, threshold: f64, epsilon: f64) -> Self {
        Self {
            window,
            threshold,
            epsilon,
        }
    }
}

impl SignalAlgorithm for ZScoreSignal {
    fn evaluate(&self, points: &[MetricPoint]) -> Vec<RawSignal> {
        let Some((latest, history)) = points.split_last() else {
            return vec![];
        };
        if history.is_empty() {
            return vec![];
        }

        let window = &history[history.len().saturating_sub(self.window)..];
        let (mean, std) = mean_and_std(window);
        let deviation = latest.value - mean;
        let direction = if deviation < 0.0 {
            SignalDirection::Down
        } else {
            SignalDirection::Up
        };

        if std < STD_FLOOR {
            if deviation.abs() <= self.epsilon {
                return vec![];
            }
            return vec![RawSignal {
                method: DetectionMethod::ZScore,
                direction,
                score: deviation.abs() / self.epsilon.max(STD_FLOOR),
                baseline_mean: mean,
                detail: format!(
                    "value {:.4} departs from constant baseline {:.4}",
                    latest.value, mean
                ),
            }];
        }

        let z = deviation / std;
        if z.abs() <= self.threshold {
            return vec![];
        }

        vec![RawSignal {
            method: DetectionMethod::ZScore,
            direction,
            score: z.abs(),
            baseline_mean: mean,
            detail: format!(
                "z-score {:.2} exceeds threshold {:.1} (mean={:.2}, std={:.2}, current={:.2})",
                z.abs(),
                self.threshold,
                mean,
                std,
                latest.value
            ),
        }]
    }

    fn name(&self) -> &'static str {
        "z_score"
    }
}

// ── CUSUM ───────────────────────────────────────────────────────────────

/// CUSUM drift detection.
///
/// Establishes a target mean/std from the first `baseline_len` periods,
/// then scans the remainder with two-sided accumulators. An accumulator
/// that crosses the decision threshold resets to zero, so one drift
/// episode triggers once. A signal is emitted only when the trigger
/// lands on the latest observation; earlier episodes are already known
/// to the alert manager from the cycles that saw them.
pub struct CusumSignal {
    pub baseline_len: usize,
    pub k_factor: f64,
    pub h_factor: f64,
}

impl CusumSignal {
    pub fn new(baseline_len: usize, k_factor: f64, h_factor: f64) -> Self {
        Self {
            baseline_len,
            k_factor,
            h_factor,
        }
    }
}

impl SignalAlgorithm for CusumSignal {
    fn evaluate(&self, points: &[MetricPoint]) -> Vec<RawSignal> {
        if points.len() <= self.baseline_len {
            return vec![];
        }

        let (mean, std) = mean_and_std(&points[..self.baseline_len]);
        // A constant baseline is the Z-score epsilon rule's territory.
        if std < STD_FLOOR {
            return vec![];
        }

        let k = self.k_factor * std;
        let h = self.h_factor * std;
        let last = points.len() - 1;

        let mut s_hi = 0.0_f64;
        let mut s_lo = 0.0_f64;
        let mut out = vec![];

        for (i, point) in points.iter().enumerate().skip(self.baseline_len) {
            let deviation = point.value - mean;
            s_hi = (s_hi + deviation - k).max(0.0);
            s_lo = (s_lo - deviation - k).max(0.0);

            if s_hi > h {
                if i == last {
                    out.push(RawSignal {
                        method: DetectionMethod::Cusum,
                        direction: SignalDirection::Up,
                        score: s_hi / std,
                        baseline_mean: mean,
                        detail: format!(
                            "sustained upward drift: CUSUM {:.2} exceeds threshold {:.2} (target mean {:.2})",
                            s_hi, h, mean
                        ),
                    });
                }
                s_hi = 0.0;
            }

            if s_lo > h {
                if i == last {
                    out.push(RawSignal {
                        method: DetectionMethod::Cusum,
                        direction: SignalDirection::Down,
                        score: s_lo / std,
                        baseline_mean: mean,
                        detail: format!(
                            "sustained downward drift: CUSUM {:.2} exceeds threshold {:.2} (target mean {:.2})",
                            s_lo, h, mean
                        ),
                    });
                }
                s_lo = 0.0;
            }
        }

        out
    }

    fn name(&self) -> &'static str {
        "cusum"
    }
}

// ── Orchestrator ────────────────────────────────────────────────────────

/// Runs all detection algorithms over one (property, metric) series and
/// keeps the signals that warrant a committee alert.
///
/// Benign-direction anomalies (occupancy jumping up, expenses dropping)
/// are logged and discarded; adverse-direction anomalies are critical,
/// which is what lets drift below any static threshold still lock a
/// property.
pub struct AnomalyDetector {
    config: DetectorConfig,
    algorithms: Vec<Box<dyn SignalAlgorithm>>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let algorithms: Vec<Box<dyn SignalAlgorithm>> = vec![
            Box::new(ZScoreSignal::new(
                config.z_window,
                config.z_threshold,
                config.epsilon,
            )),
            Box::new(CusumSignal::new(
                config.min_history,
                config.cusum_k_factor,
                config.cusum_h_factor,
            )),
        ];
        Self { config, algorithms }
    }

    /// Create with custom algorithms.
    pub fn with_algorithms(
        config: DetectorConfig,
        algorithms: Vec<Box<dyn SignalAlgorithm>>,
    ) -> Self {
        Self { config, algorithms }
    }

    pub fn algorithm_count(&self) -> usize {
        self.algorithms.len()
    }

    /// Evaluate one (property, metric) series.
    ///
    /// Corrupt (non-finite) observations are logged and dropped before
    /// detection; a series below the minimum history is skipped for this
    /// cycle without error.
    pub fn evaluate_series(
        &self,
        property_id: PropertyId,
        metric: MetricType,
        points: &[MetricPoint],
    ) -> Vec<AnomalySignal> {
        let valid: Vec<MetricPoint> = points
            .iter()
            .filter(|p| {
                if p.is_valid() {
                    true
                } else {
                    warn!(%property_id, %metric, period = %p.period, "corrupt observation skipped");
                    false
                }
            })
            .copied()
            .collect();

        if valid.len() < self.config.min_history {
            debug!(
                %property_id,
                %metric,
                periods = valid.len(),
                required = self.config.min_history,
                "insufficient history, skipping metric this cycle"
            );
            return vec![];
        }

        // split_last cannot fail: min_history >= 1 is enforced above.
        let latest = valid[valid.len() - 1];
        let mut signals = vec![];

        for algo in &self.algorithms {
            for raw in algo.evaluate(&valid) {
                if !raw.direction.is_adverse_for(metric) {
                    debug!(
                        %property_id,
                        %metric,
                        algorithm = algo.name(),
                        score = raw.score,
                        "benign-direction anomaly, not alertable"
                    );
                    continue;
                }
                signals.push(AnomalySignal {
                    property_id,
                    metric,
                    observed: latest.value,
                    period: latest.period,
                    method: raw.method,
                    score: raw.score,
                    baseline_mean: raw.baseline_mean,
                    severity: AlertSeverity::Critical,
                    detail: raw.detail,
                });
            }
        }

        signals
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

fn mean_and_std(points: &[MetricPoint]) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let n = points.len() as f64;
    let mean = points.iter().map(|p| p.value).sum::<f64>() / n;
    let variance = points
        .iter()
        .map(|p| (p.value - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}
