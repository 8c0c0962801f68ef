use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::percentiles::{calculate_percentiles, percentile, percentile_points, sort_samples};
use super::store::{DurationFilter, MetricsStore, StoreError};
use super::views::{
    bucket_time, round2, ErrorCounts, ErrorRate, ErrorRateTrend, MethodPercentiles,
    PercentileTrend, RoutePerformance, SchemePerformance, TimeSeriesPoint,
};
use crate::ids::IdScheme;

// ─── Configuration ───────────────────────────────────────────────

/// Trailing window used when a query gives no usable `hours`.
pub const DEFAULT_WINDOW_HOURS: i64 = 24;

/// Upper bound on buckets returned by any trend query.
pub const MAX_SERIES_BUCKETS: i64 = 20;

/// Methods reported by [`MetricsAnalytics::percentiles`], in response order.
pub const PERCENTILE_METHODS: [&str; 4] = ["GET", "POST", "PUT", "DELETE"];

/// Time-bucket width for the series queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketInterval {
    #[default]
    Hour,
}

impl BucketInterval {
    pub fn millis(&self) -> i64 {
        match self {
            BucketInterval::Hour => 3_600_000,
        }
    }
}

/// Resolves a requested window: absent, zero, or negative means the default.
pub fn window_hours(requested: Option<i64>) -> i64 {
    match requested {
        Some(h) if h > 0 => h,
        _ => DEFAULT_WINDOW_HOURS,
    }
}

/// Start of the trailing window ending now. A window reaching past the
/// representable time range is rejected rather than clamped.
pub fn window_start(requested: Option<i64>) -> Result<DateTime<Utc>, StoreError> {
    let hours = window_hours(requested);
    Duration::try_hours(hours)
        .and_then(|span| Utc::now().checked_sub_signed(span))
        .ok_or(StoreError::WindowOutOfRange(hours))
}

// ─── Aggregation queries ─────────────────────────────────────────

/// Read-side reducers over the observation store.
///
/// Holds nothing but the store handle: each call reads a fresh snapshot and
/// derives its result from it, so concurrent callers need no coordination.
#[derive(Clone)]
pub struct MetricsAnalytics {
    store: Arc<dyn MetricsStore>,
}

impl MetricsAnalytics {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    /// Mean latency per scheme over **successful** requests only. Error
    /// paths tend to fail fast and would drag the averages down.
    pub async fn average_by_scheme(&self) -> Result<Vec<SchemePerformance>, StoreError> {
        self.store.scheme_averages().await
    }

    /// Per-(route, method) averages plus quartiles for one scheme.
    ///
    /// Averages, extremes and quartiles cover every observation of the group,
    /// errors included, so `error_count` and the latency figures describe the
    /// same population.
    pub async fn performance_by_route(
        &self,
        scheme: IdScheme,
    ) -> Result<Vec<RoutePerformance>, StoreError> {
        let aggregates = self.store.route_aggregates(scheme).await?;

        let mut routes = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            let filter = DurationFilter {
                route_path: Some(agg.route_path.clone()),
                http_method: Some(agg.http_method.clone()),
                include_errors: true,
                ..DurationFilter::for_scheme(scheme)
            };
            let sorted = self.store.durations(&filter).await?;

            routes.push(RoutePerformance {
                quartile1: percentile(&sorted, 0.25),
                median: percentile(&sorted, 0.50),
                quartile3: percentile(&sorted, 0.75),
                route_path: agg.route_path,
                http_method: agg.http_method,
                avg_duration: agg.avg_duration,
                min_duration: agg.min_duration,
                max_duration: agg.max_duration,
                avg_db_duration: agg.avg_db_duration,
                request_count: agg.request_count,
                error_count: agg.error_count,
            });
        }
        Ok(routes)
    }

    /// Percentiles of successful requests for one method within the trailing window.
    pub async fn method_percentiles(
        &self,
        scheme: IdScheme,
        hours: Option<i64>,
        method: &str,
    ) -> Result<MethodPercentiles, StoreError> {
        let since = window_start(hours)?;
        let filter = DurationFilter {
            http_method: Some(method.to_string()),
            since: Some(since),
            ..DurationFilter::for_scheme(scheme)
        };
        let sorted = self.store.durations(&filter).await?;

        Ok(MethodPercentiles {
            sample_count: sorted.len(),
            stats: calculate_percentiles(&sorted),
            points: percentile_points(&sorted),
        })
    }

    /// [`Self::method_percentiles`] for each of GET, POST, PUT and DELETE.
    pub async fn percentiles(
        &self,
        scheme: IdScheme,
        hours: Option<i64>,
    ) -> Result<BTreeMap<String, MethodPercentiles>, StoreError> {
        let mut by_method = BTreeMap::new();
        for method in PERCENTILE_METHODS {
            let stats = self.method_percentiles(scheme, hours, method).await?;
            by_method.insert(method.to_string(), stats);
        }
        Ok(by_method)
    }

    /// Error percentage per scheme, over every request.
    ///
    /// Every benchmarked scheme is listed even before it has traffic (as 0 of
    /// 0); `Unknown` appears only once something unclassified was recorded.
    pub async fn error_rates(&self) -> Result<Vec<ErrorRate>, StoreError> {
        let mut counts = self.store.error_counts().await?;
        for scheme in IdScheme::ALL {
            if !counts.iter().any(|c| c.id_type == scheme) {
                counts.push(ErrorCounts {
                    id_type: scheme,
                    total_requests: 0,
                    error_count: 0,
                });
            }
        }
        counts.sort_by_key(|c| c.id_type);
        Ok(counts.into_iter().map(ErrorRate::from_counts).collect())
    }

    /// Mean latency per bucket within the trailing window; at most the
    /// [`MAX_SERIES_BUCKETS`] most recent buckets, oldest first.
    pub async fn time_series(
        &self,
        scheme: IdScheme,
        interval: BucketInterval,
        hours: Option<i64>,
    ) -> Result<Vec<TimeSeriesPoint>, StoreError> {
        let since = window_start(hours)?;
        let buckets = self
            .store
            .bucket_averages(scheme, interval.millis(), since, MAX_SERIES_BUCKETS)
            .await?;

        Ok(buckets
            .into_iter()
            .map(|b| TimeSeriesPoint {
                time_bucket: bucket_time(b.bucket_start_ms),
                avg_duration: b.avg_duration,
                request_count: b.request_count,
            })
            .collect())
    }

    /// Hourly error rate over all history, oldest first.
    pub async fn error_rate_trend(&self, scheme: IdScheme) -> Result<Vec<ErrorRateTrend>, StoreError> {
        let buckets = self
            .store
            .bucket_error_counts(scheme, BucketInterval::Hour.millis(), MAX_SERIES_BUCKETS)
            .await?;

        Ok(buckets
            .into_iter()
            .map(|b| {
                let error_rate = if b.request_count > 0 {
                    round2(100.0 * b.error_count as f64 / b.request_count as f64)
                } else {
                    0.0
                };
                ErrorRateTrend {
                    time_bucket: bucket_time(b.bucket_start_ms),
                    request_count: b.request_count,
                    error_count: b.error_count,
                    error_rate,
                }
            })
            .collect())
    }

    /// Hourly P50/P95/P99 over all history, oldest first.
    pub async fn duration_trend(&self, scheme: IdScheme) -> Result<Vec<PercentileTrend>, StoreError> {
        let buckets = self
            .store
            .bucket_durations(scheme, BucketInterval::Hour.millis())
            .await?;

        Ok(buckets
            .into_iter()
            .map(|mut b| {
                sort_samples(&mut b.durations);
                let stats = calculate_percentiles(&b.durations);
                PercentileTrend {
                    time_bucket: bucket_time(b.bucket_start_ms),
                    request_count: b.durations.len() as i64,
                    p50_duration: stats.p50,
                    p95_duration: stats.p95,
                    p99_duration: stats.p99,
                }
            })
            .collect())
    }
}
