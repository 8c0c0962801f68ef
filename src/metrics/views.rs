//! Read-side shapes returned by the analytics endpoints.
//!
//! Every value here is recomputed from `route_metrics` (or the users tables)
//! on each request; none of them is stored.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::percentiles::{PercentilePoint, PercentileStats};
use crate::ids::IdScheme;

/// Mean latency of successful requests for one scheme.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemePerformance {
    pub id_type: IdScheme,
    pub avg_duration: f64,
    pub request_count: i64,
}

/// Raw per-(route, method) aggregate as the store computes it.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteAggregate {
    pub route_path: String,
    pub http_method: String,
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub avg_db_duration: f64,
    pub request_count: i64,
    pub error_count: i64,
}

/// Per-(route, method) latency summary, averages and quartiles together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePerformance {
    pub route_path: String,
    pub http_method: String,
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub avg_db_duration: f64,
    pub quartile1: f64,
    pub median: f64,
    pub quartile3: f64,
    pub request_count: i64,
    pub error_count: i64,
}

/// Percentiles of one HTTP method, in both reporting forms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodPercentiles {
    pub sample_count: usize,
    pub stats: PercentileStats,
    pub points: Vec<PercentilePoint>,
}

/// Raw request/error totals for one scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorCounts {
    pub id_type: IdScheme,
    pub total_requests: i64,
    pub error_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRate {
    pub id_type: IdScheme,
    pub total_requests: i64,
    pub error_count: i64,
    pub error_percentage: f64,
}

impl ErrorRate {
    /// Zero requests is a 0% error rate, not a division fault.
    pub fn from_counts(counts: ErrorCounts) -> Self {
        let error_percentage = if counts.total_requests > 0 {
            100.0 * counts.error_count as f64 / counts.total_requests as f64
        } else {
            0.0
        };
        Self {
            id_type: counts.id_type,
            total_requests: counts.total_requests,
            error_count: counts.error_count,
            error_percentage,
        }
    }
}

/// One bucket of the average-latency chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPoint {
    pub time_bucket: DateTime<Utc>,
    pub avg_duration: f64,
    pub request_count: i64,
}

/// Raw per-bucket mean as the store computes it.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketAverage {
    pub bucket_start_ms: i64,
    pub avg_duration: f64,
    pub request_count: i64,
}

/// Raw per-bucket counts as the store computes them.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketCounts {
    pub bucket_start_ms: i64,
    pub request_count: i64,
    pub error_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRateTrend {
    pub time_bucket: DateTime<Utc>,
    pub request_count: i64,
    pub error_count: i64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileTrend {
    pub time_bucket: DateTime<Utc>,
    pub request_count: i64,
    pub p50_duration: f64,
    pub p95_duration: f64,
    pub p99_duration: f64,
}

/// Row count and mean serialized id width of one users table.
#[derive(Debug, Clone, PartialEq)]
pub struct IdColumnStats {
    pub table_name: String,
    pub row_count: i64,
    pub avg_id_bytes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdEfficiency {
    pub table_name: String,
    pub row_count: i64,
    pub avg_id_bytes: f64,
    pub theoretical_min_bytes: f64,
    pub efficiency_percent: f64,
    /// `None` when no finite multiplier exists (fewer than two rows).
    pub waste_factor: Option<f64>,
}

/// Raw payload size of one users table.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTableSize {
    pub table_name: String,
    pub row_count: i64,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSize {
    pub table_name: String,
    pub row_count: i64,
    pub size_bytes: i64,
    pub size_pretty: String,
}

/// Rounds to two decimal places, the precision the reports are shown at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Converts a bucket start in Unix milliseconds into a timestamp.
pub fn bucket_time(bucket_start_ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(bucket_start_ms).unwrap_or_default()
}
