use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::views::{
    BucketAverage, BucketCounts, ErrorCounts, IdColumnStats, RawTableSize, RouteAggregate,
    SchemePerformance,
};
use super::Observation;
use crate::ids::IdScheme;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unreadable row: {0}")]
    InvalidRow(String),

    #[error("a window of {0} hours is out of range")]
    WindowOutOfRange(i64),
}

/// Which duration samples to pull for a percentile computation.
#[derive(Debug, Clone, Default)]
pub struct DurationFilter {
    pub scheme: Option<IdScheme>,
    pub route_path: Option<String>,
    pub http_method: Option<String>,
    /// Only observations at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Error observations are excluded unless this is set.
    pub include_errors: bool,
}

impl DurationFilter {
    pub fn for_scheme(scheme: IdScheme) -> Self {
        Self {
            scheme: Some(scheme),
            ..Self::default()
        }
    }
}

/// One bucket's duration samples, sorted ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSamples {
    pub bucket_start_ms: i64,
    pub durations: Vec<f64>,
}

/// Storage collaborator for observations: one append operation and the
/// grouped reads the analytics are built from.
///
/// Implementations hold no aggregate state of their own; every read reflects
/// whatever the backing store contains at call time.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn insert(&self, observation: &Observation) -> Result<(), StoreError>;

    /// Mean total duration and count of non-error observations per scheme.
    async fn scheme_averages(&self) -> Result<Vec<SchemePerformance>, StoreError>;

    /// Per-(route, method) aggregates of every observation of `scheme`.
    async fn route_aggregates(&self, scheme: IdScheme) -> Result<Vec<RouteAggregate>, StoreError>;

    /// Matching total durations, sorted ascending.
    async fn durations(&self, filter: &DurationFilter) -> Result<Vec<f64>, StoreError>;

    /// Total and error counts per scheme, errors included.
    async fn error_counts(&self) -> Result<Vec<ErrorCounts>, StoreError>;

    /// Every observation of `scheme` since `since`, grouped into buckets of
    /// `bucket_ms`: the most recent `limit` buckets, ascending.
    async fn bucket_averages(
        &self,
        scheme: IdScheme,
        bucket_ms: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BucketAverage>, StoreError>;

    /// Request and error counts per bucket, oldest first, at most `limit`.
    async fn bucket_error_counts(
        &self,
        scheme: IdScheme,
        bucket_ms: i64,
        limit: i64,
    ) -> Result<Vec<BucketCounts>, StoreError>;

    /// All durations of `scheme` grouped per bucket, oldest bucket first.
    async fn bucket_durations(
        &self,
        scheme: IdScheme,
        bucket_ms: i64,
    ) -> Result<Vec<BucketSamples>, StoreError>;
}

/// Size introspection over the per-scheme users tables.
#[async_trait]
pub trait TableIntrospector: Send + Sync {
    /// Row count and mean serialized id size, one entry per scheme table.
    async fn id_column_stats(&self) -> Result<Vec<IdColumnStats>, StoreError>;

    /// Row count and payload size, one entry per scheme table.
    async fn table_sizes(&self) -> Result<Vec<RawTableSize>, StoreError>;
}
