//! Nearest-rank order statistics over duration samples.
//!
//! Every function here expects its input **already sorted ascending**. Nothing
//! sorts internally: the store returns samples ordered by duration, and
//! [`sort_samples`] exists for callers that collect samples themselves.
//! Unsorted input does not panic, it just yields meaningless values.

use serde::Serialize;

/// The fixed fractions reported by [`calculate_percentiles`], with their labels.
pub const STANDARD_PERCENTILES: [(&str, f64); 5] = [
    ("P50", 0.50),
    ("P75", 0.75),
    ("P90", 0.90),
    ("P95", 0.95),
    ("P99", 0.99),
];

/// A complete percentile breakdown for one sample set.
/// All-zero when the set was empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PercentileStats {
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// One labelled value, the charting form of [`PercentileStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentilePoint {
    pub percentile: String,
    pub value: f64,
}

/// Value at fraction `p` of `sorted`: `sorted[floor((n - 1) * p)]`.
///
/// `p` is clamped to `[0, 1]`. An empty slice yields `0.0`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let Some(last) = sorted.len().checked_sub(1) else {
        return 0.0;
    };
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
    let index = (last as f64 * p).floor() as usize;
    sorted[index.min(last)]
}

/// P50/P75/P90/P95/P99 of an ascending sample set.
pub fn calculate_percentiles(sorted: &[f64]) -> PercentileStats {
    if sorted.is_empty() {
        return PercentileStats::default();
    }
    PercentileStats {
        p50: percentile(sorted, 0.50),
        p75: percentile(sorted, 0.75),
        p90: percentile(sorted, 0.90),
        p95: percentile(sorted, 0.95),
        p99: percentile(sorted, 0.99),
    }
}

/// Same fractions as [`calculate_percentiles`], as labelled points.
/// Empty input yields no points.
pub fn percentile_points(sorted: &[f64]) -> Vec<PercentilePoint> {
    if sorted.is_empty() {
        return Vec::new();
    }
    calculate_percentiles(sorted).points()
}

impl PercentileStats {
    /// The struct in [`STANDARD_PERCENTILES`] order.
    pub fn points(&self) -> Vec<PercentilePoint> {
        let values = [self.p50, self.p75, self.p90, self.p95, self.p99];
        STANDARD_PERCENTILES
            .iter()
            .zip(values)
            .map(|((label, _), value)| PercentilePoint {
                percentile: (*label).to_string(),
                value,
            })
            .collect()
    }
}

/// Sorts ascending with a total order, so NaN cannot poison the ordering.
pub fn sort_samples(samples: &mut [f64]) {
    samples.sort_by(f64::total_cmp);
}
