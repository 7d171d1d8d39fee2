//! Seam to the external metric series source.

use async_trait::async_trait;
use thiserror::Error;

use parapet_types::{MetricPoint, MetricType, PropertyId};

/// Failure fetching one property's series.
///
/// Always isolated to the (property, metric) being fetched: the batch
/// cycle logs it, counts it, and moves on to the next property.
#[derive(Debug, Error)]
pub enum MetricFetchError {
    #[error("metric source timed out for {property_id} / {metric}")]
    Timeout {
        property_id: PropertyId,
        metric: MetricType,
    },

    #[error("metric source unavailable: {0}")]
    Unavailable(String),

    #[error("metric source rejected request: {0}")]
    Rejected(String),
}

/// Supplies ordered per-property, per-metric time series.
///
/// Implementations must return points ordered by period, oldest first,
/// and must tolerate sparse history (an empty series is a valid answer).
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn get_metric_series(
        &self,
        property_id: PropertyId,
        metric: MetricType,
    ) -> Result<Vec<MetricPoint>, MetricFetchError>;
}
