//! Detector configuration.

/// Tuning knobs for the anomaly detection pipeline.
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Minimum series length before any detection runs; shorter series
    /// are skipped for the cycle, not treated as errors.
    pub min_history: usize,
    /// Trailing window length for the rolling Z-score, excluding the
    /// current observation.
    pub z_window: usize,
    /// Z-score magnitude that flags an anomaly.
    pub z_threshold: f64,
    /// Deviation from a constant history that still counts as anomalous
    /// when the rolling std is ~0.
    pub epsilon: f64,
    /// CUSUM drift allowance, as a multiple of baseline std.
    pub cusum_k_factor: f64,
    /// CUSUM decision threshold, as a multiple of baseline std.
    pub cusum_h_factor: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_history: 6,
            z_window: 12,
            z_threshold: 2.5,
            epsilon: 1e-6,
            cusum_k_factor: 0.5,
            cusum_h_factor: 4.0,
        }
    }
}
