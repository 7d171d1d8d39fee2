//! Detection layer for the Parapet governance engine.
//!
//! Two independent signal paths feed the alert manager:
//! - a stateless [`ThresholdTable`] classifying the latest metric snapshot
//!   against fixed governance bounds, and
//! - an [`AnomalyDetector`] running rolling Z-score and CUSUM drift
//!   algorithms over the full series, catching deterioration that never
//!   breaches a static bound in any single period.
//!
//! Neither path writes anything: both produce candidate signals, and all
//! deduplication happens downstream in the alert manager.

mod config;
mod detector;
mod source;
mod thresholds;

pub use config::DetectorConfig;
pub use detector::{
    AnomalyDetector, AnomalySignal, CusumSignal, RawSignal, SignalAlgorithm, SignalDirection,
    ZScoreSignal,
};
pub use source::{MetricFetchError, MetricSource};
pub use thresholds::{ThresholdBreach, ThresholdTable};
