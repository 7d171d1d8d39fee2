//! The batch detection cycle: fetch series, detect, route to alerts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use parapet_detect::{
    AnomalyDetector, MetricFetchError, MetricSource, ThresholdBreach, ThresholdTable,
};
use parapet_types::{
    AlertEvidence, AlertSeverity, AlertType, DetectionMethod, MetricPoint, MetricType, PropertyId,
};

use crate::alerts::{AlertManager, AlertOutcome};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Counters from one cycle run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub properties_processed: usize,
    /// Alertable conditions found (static breaches and detector signals,
    /// before per-alert-type merging).
    pub signals: usize,
    pub alerts_created: usize,
    pub alerts_updated: usize,
    /// Metrics with no observations this cycle.
    pub metrics_skipped: usize,
    pub fetch_failures: usize,
    pub store_failures: usize,
}

/// Scheduled sweep over the portfolio.
///
/// Every failure is isolated to the (property, metric) it occurred on:
/// one property's bad feed never stops the rest of the portfolio from
/// being screened. The cycle is idempotent — re-running over unchanged
/// series updates open alerts instead of duplicating them.
pub struct DetectionCycle {
    source: Arc<dyn MetricSource>,
    detector: AnomalyDetector,
    thresholds: ThresholdTable,
    alerts: AlertManager,
    fetch_timeout: Duration,
}

impl DetectionCycle {
    pub fn new(source: Arc<dyn MetricSource>, alerts: AlertManager) -> Self {
        Self {
            source,
            detector: AnomalyDetector::default(),
            thresholds: ThresholdTable::standard(),
            alerts,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_detector(mut self, detector: AnomalyDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Screen every property and route findings into the alert store.
    pub async fn run(&self, properties: &[PropertyId]) -> CycleReport {
        let mut report = CycleReport::default();
        for &property_id in properties {
            self.run_property(property_id, &mut report).await;
            report.properties_processed += 1;
        }
        info!(
            properties = report.properties_processed,
            signals = report.signals,
            created = report.alerts_created,
            updated = report.alerts_updated,
            skipped = report.metrics_skipped,
            fetch_failures = report.fetch_failures,
            store_failures = report.store_failures,
            "detection cycle complete"
        );
        report
    }

    async fn run_property(&self, property_id: PropertyId, report: &mut CycleReport) {
        // Highest severity wins when static rules and the detector hit
        // the same alert type; evidence from both is attached.
        let mut findings: HashMap<AlertType, (AlertSeverity, Vec<AlertEvidence>)> = HashMap::new();

        for metric in MetricType::ALL {
            let points = match self.fetch(property_id, metric).await {
                Ok(points) => points,
                Err(err) => {
                    warn!(property = %property_id, %metric, %err, "metric fetch failed");
                    report.fetch_failures += 1;
                    continue;
                }
            };
            // The detector filters and warns on corrupt points itself;
            // the static check falls back to the latest finite value so
            // one bad observation cannot mask a breach.
            let Some(latest) = points.iter().rev().find(|p| p.is_valid()).copied() else {
                if points.is_empty() {
                    debug!(property = %property_id, %metric, "no observations");
                } else {
                    warn!(property = %property_id, %metric, "no finite observations in series");
                }
                report.metrics_skipped += 1;
                continue;
            };

            if let Some(breach) = self.thresholds.evaluate(metric, &latest) {
                report.signals += 1;
                merge_finding(
                    &mut findings,
                    AlertType::for_metric(metric),
                    breach.severity,
                    breach_evidence(&breach, &latest),
                );
            }

            for signal in self.detector.evaluate_series(property_id, metric, &points) {
                report.signals += 1;
                merge_finding(
                    &mut findings,
                    signal.alert_type(),
                    signal.severity,
                    signal.to_evidence(),
                );
            }
        }

        for (alert_type, (severity, evidence)) in findings {
            match self
                .alerts
                .create_or_update_alert(property_id, alert_type, severity, evidence)
                .await
            {
                Ok(AlertOutcome::Created(_)) => report.alerts_created += 1,
                Ok(AlertOutcome::Updated(_)) => report.alerts_updated += 1,
                Err(err) => {
                    error!(property = %property_id, %alert_type, %err, "alert write failed");
                    report.store_failures += 1;
                }
            }
        }
    }

    async fn fetch(
        &self,
        property_id: PropertyId,
        metric: MetricType,
    ) -> Result<Vec<MetricPoint>, MetricFetchError> {
        match tokio::time::timeout(
            self.fetch_timeout,
            self.source.get_metric_series(property_id, metric),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MetricFetchError::Timeout {
                property_id,
                metric,
            }),
        }
    }
}

fn merge_finding(
    findings: &mut HashMap<AlertType, (AlertSeverity, Vec<AlertEvidence>)>,
    alert_type: AlertType,
    severity: AlertSeverity,
    evidence: AlertEvidence,
) {
    let entry = findings
        .entry(alert_type)
        .or_insert_with(|| (severity, vec![]));
    entry.0 = entry.0.max(severity);
    entry.1.push(evidence);
}

fn breach_evidence(breach: &ThresholdBreach, latest: &MetricPoint) -> AlertEvidence {
    AlertEvidence {
        metric: breach.metric,
        observed: breach.observed,
        period: latest.period,
        method: DetectionMethod::StaticThreshold,
        score: None,
        baseline_mean: None,
        threshold: Some(breach.threshold),
        detail: breach.detail.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GovernanceStore, MemoryGovernanceStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    struct MapSource {
        data: HashMap<(PropertyId, MetricType), Vec<MetricPoint>>,
        failing: HashSet<PropertyId>,
    }

    impl MapSource {
        fn new() -> Self {
            Self {
                data: HashMap::new(),
                failing: HashSet::new(),
            }
        }

        fn set(&mut self, property: PropertyId, metric: MetricType, values: &[f64]) {
            let points = values
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    let month = (i % 12) as u32 + 1;
                    let year = 2025 + (i / 12) as i32;
                    MetricPoint::new(NaiveDate::from_ymd_opt(year, month, 1).unwrap(), v)
                })
                .collect();
            self.data.insert((property, metric), points);
        }
    }

    #[async_trait]
    impl MetricSource for MapSource {
        async fn get_metric_series(
            &self,
            property_id: PropertyId,
            metric: MetricType,
        ) -> Result<Vec<MetricPoint>, MetricFetchError> {
            if self.failing.contains(&property_id) {
                return Err(MetricFetchError::Unavailable("feed down".into()));
            }
            Ok(self
                .data
                .get(&(property_id, metric))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn cycle(source: MapSource) -> (DetectionCycle, Arc<MemoryGovernanceStore>) {
        let store = Arc::new(MemoryGovernanceStore::new());
        let manager = AlertManager::new(store.clone());
        (DetectionCycle::new(Arc::new(source), manager), store)
    }

    #[tokio::test]
    async fn static_breach_creates_locked_alert() {
        let property = PropertyId::new();
        let mut source = MapSource::new();
        source.set(property, MetricType::Dscr, &[1.45, 1.44, 1.43, 1.10]);

        let (cycle, store) = cycle(source);
        let report = cycle.run(&[property]).await;

        assert_eq!(report.alerts_created, 1);
        assert_eq!(report.store_failures, 0);
        assert!(store.has_active_alerts(property).await.unwrap());
        let locks = store.locks_for_property(property).await.unwrap();
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn rerun_updates_instead_of_duplicating() {
        let property = PropertyId::new();
        let mut source = MapSource::new();
        source.set(property, MetricType::Dscr, &[1.45, 1.44, 1.43, 1.10]);

        let (cycle, store) = cycle(source);
        let first = cycle.run(&[property]).await;
        let second = cycle.run(&[property]).await;

        assert_eq!(first.alerts_created, 1);
        assert_eq!(second.alerts_created, 0);
        assert_eq!(second.alerts_updated, 1);
        // Still exactly one lock after the second pass.
        assert_eq!(store.locks_for_property(property).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn static_and_detector_merge_into_one_alert() {
        let property = PropertyId::new();
        let mut source = MapSource::new();
        // Occupancy collapses from a stable low-90s baseline to 78: both
        // the static table and the z-score fire on the same alert type.
        source.set(
            property,
            MetricType::Occupancy,
            &[91.0, 91.2, 90.8, 91.1, 90.9, 91.0, 91.1, 90.9, 78.0],
        );

        let (cycle, store) = cycle(source);
        let report = cycle.run(&[property]).await;

        assert!(report.signals >= 2);
        assert_eq!(report.alerts_created, 1);
        let locks = store.locks_for_property(property).await.unwrap();
        assert_eq!(locks.len(), 1, "one alert, one lock");

        let alert = store
            .get_alert(locks[0].alert_id)
            .await
            .unwrap()
            .expect("alert");
        assert_eq!(alert.alert_type, AlertType::OccupancyLow);
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert!(alert.evidence.len() >= 2);
        let methods: HashSet<_> = alert.evidence.iter().map(|e| e.method).collect();
        assert!(methods.contains(&DetectionMethod::StaticThreshold));
        assert!(methods.contains(&DetectionMethod::ZScore));
    }

    #[tokio::test]
    async fn failing_feed_is_isolated() {
        let healthy = PropertyId::new();
        let broken = PropertyId::new();
        let mut source = MapSource::new();
        source.set(healthy, MetricType::Dscr, &[1.45, 1.44, 1.10]);
        source.failing.insert(broken);

        let (cycle, _) = cycle(source);
        let report = cycle.run(&[broken, healthy]).await;

        assert_eq!(report.properties_processed, 2);
        assert_eq!(report.fetch_failures, MetricType::ALL.len());
        assert_eq!(report.alerts_created, 1, "healthy property still screened");
    }

    #[tokio::test]
    async fn slow_feed_times_out() {
        struct SlowSource;

        #[async_trait]
        impl MetricSource for SlowSource {
            async fn get_metric_series(
                &self,
                _property_id: PropertyId,
                _metric: MetricType,
            ) -> Result<Vec<MetricPoint>, MetricFetchError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![])
            }
        }

        let store = Arc::new(MemoryGovernanceStore::new());
        let manager = AlertManager::new(store);
        let cycle = DetectionCycle::new(Arc::new(SlowSource), manager)
            .with_fetch_timeout(Duration::from_millis(10));

        let report = cycle.run(&[PropertyId::new()]).await;
        assert_eq!(report.fetch_failures, MetricType::ALL.len());
    }

    #[tokio::test]
    async fn corrupt_latest_observation_does_not_mask_breach() {
        let property = PropertyId::new();
        let mut source = MapSource::new();
        // Static path: the breach landed one period before the feed
        // went bad.
        source.set(property, MetricType::Dscr, &[1.45, 1.44, 1.43, 1.10, f64::NAN]);
        // Detector path: the drift target is the last finite point.
        source.set(
            property,
            MetricType::Occupancy,
            &[90.0, 90.2, 89.8, 90.1, 89.9, 90.0, 90.1, 89.9, 86.0, f64::NAN],
        );

        let (cycle, store) = cycle(source);
        let report = cycle.run(&[property]).await;

        assert_eq!(report.alerts_created, 2);
        let locks = store.locks_for_property(property).await.unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn fully_corrupt_series_is_skipped() {
        let property = PropertyId::new();
        let mut source = MapSource::new();
        source.set(property, MetricType::Dscr, &[f64::NAN, f64::NAN]);

        let (cycle, _) = cycle(source);
        let report = cycle.run(&[property]).await;

        assert_eq!(report.signals, 0);
        assert_eq!(report.alerts_created, 0);
        assert_eq!(report.metrics_skipped, MetricType::ALL.len());
    }

    #[tokio::test]
    async fn healthy_portfolio_is_quiet() {
        let property = PropertyId::new();
        let mut source = MapSource::new();
        source.set(
            property,
            MetricType::Dscr,
            &[1.45, 1.46, 1.44, 1.45, 1.46, 1.44, 1.45],
        );
        source.set(
            property,
            MetricType::Occupancy,
            &[92.0, 92.5, 91.5, 92.0, 92.5, 91.5, 92.0],
        );

        let (cycle, store) = cycle(source);
        let report = cycle.run(&[property]).await;

        assert_eq!(report.signals, 0);
        assert_eq!(report.alerts_created, 0);
        // NOI and expense ratio had no data.
        assert_eq!(report.metrics_skipped, 2);
        assert!(!store.has_active_alerts(property).await.unwrap());
    }
}
