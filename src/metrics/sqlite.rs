use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::store::{BucketSamples, DurationFilter, MetricsStore, StoreError, TableIntrospector};
use super::views::{
    BucketAverage, BucketCounts, ErrorCounts, IdColumnStats, RawTableSize, RouteAggregate,
    SchemePerformance,
};
use super::Observation;
use crate::ids::IdScheme;

/// Serialized width of an id value: 8 bytes for integers, byte length otherwise.
const ID_BYTES_EXPR: &str =
    "CASE typeof(id) WHEN 'integer' THEN 8 ELSE length(CAST(id AS BLOB)) END";

/// [`MetricsStore`] and [`TableIntrospector`] over the shared SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn scheme_column(row: &SqliteRow) -> Result<IdScheme, StoreError> {
    let raw: String = row.try_get("id_type")?;
    raw.parse()
        .map_err(|_| StoreError::InvalidRow(format!("unknown id_type '{raw}'")))
}

#[async_trait]
impl MetricsStore for SqliteStore {
    async fn insert(&self, o: &Observation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO route_metrics (
                route_path, http_method, id_type,
                total_duration, db_query_duration, handler_duration,
                status_code, response_size, is_error, error_message,
                request_id, timestamp_ms, user_agent, ip_address
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&o.route_path)
        .bind(&o.http_method)
        .bind(o.id_scheme.as_str())
        .bind(o.total_duration_ms)
        .bind(o.db_duration_ms)
        .bind(o.handler_duration_ms)
        .bind(i64::from(o.status_code))
        .bind(i64::try_from(o.response_size_bytes).unwrap_or(i64::MAX))
        .bind(o.is_error)
        .bind(o.error_message.as_deref())
        .bind(&o.request_id)
        .bind(o.timestamp.timestamp_millis())
        .bind(&o.user_agent)
        .bind(&o.client_ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn scheme_averages(&self) -> Result<Vec<SchemePerformance>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id_type, AVG(total_duration) AS avg_duration, COUNT(*) AS request_count
            FROM route_metrics
            WHERE is_error = 0
            GROUP BY id_type
            ORDER BY id_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<SchemePerformance, StoreError> {
                Ok(SchemePerformance {
                    id_type: scheme_column(row)?,
                    avg_duration: row.try_get("avg_duration")?,
                    request_count: row.try_get("request_count")?,
                })
            })
            .collect()
    }

    async fn route_aggregates(&self, scheme: IdScheme) -> Result<Vec<RouteAggregate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                route_path,
                http_method,
                AVG(total_duration)    AS avg_duration,
                MIN(total_duration)    AS min_duration,
                MAX(total_duration)    AS max_duration,
                AVG(db_query_duration) AS avg_db_duration,
                COUNT(*)               AS request_count,
                SUM(CASE WHEN is_error THEN 1 ELSE 0 END) AS error_count
            FROM route_metrics
            WHERE id_type = ?
            GROUP BY route_path, http_method
            ORDER BY route_path, http_method
            "#,
        )
        .bind(scheme.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<RouteAggregate, StoreError> {
                Ok(RouteAggregate {
                    route_path: row.try_get("route_path")?,
                    http_method: row.try_get("http_method")?,
                    avg_duration: row.try_get("avg_duration")?,
                    min_duration: row.try_get("min_duration")?,
                    max_duration: row.try_get("max_duration")?,
                    avg_db_duration: row.try_get("avg_db_duration")?,
                    request_count: row.try_get("request_count")?,
                    error_count: row.try_get("error_count")?,
                })
            })
            .collect()
    }

    async fn durations(&self, filter: &DurationFilter) -> Result<Vec<f64>, StoreError> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT total_duration FROM route_metrics WHERE 1 = 1");
        if let Some(scheme) = filter.scheme {
            qb.push(" AND id_type = ").push_bind(scheme.as_str());
        }
        if let Some(route) = &filter.route_path {
            qb.push(" AND route_path = ").push_bind(route.clone());
        }
        if let Some(method) = &filter.http_method {
            qb.push(" AND http_method = ").push_bind(method.clone());
        }
        if let Some(since) = filter.since {
            qb.push(" AND timestamp_ms >= ").push_bind(since.timestamp_millis());
        }
        if !filter.include_errors {
            qb.push(" AND is_error = 0");
        }
        qb.push(" ORDER BY total_duration ASC");

        let durations = qb
            .build_query_scalar::<f64>()
            .fetch_all(&self.pool)
            .await?;
        Ok(durations)
    }

    async fn error_counts(&self) -> Result<Vec<ErrorCounts>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id_type,
                COUNT(*) AS total_requests,
                SUM(CASE WHEN is_error THEN 1 ELSE 0 END) AS error_count
            FROM route_metrics
            GROUP BY id_type
            ORDER BY id_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ErrorCounts, StoreError> {
                Ok(ErrorCounts {
                    id_type: scheme_column(row)?,
                    total_requests: row.try_get("total_requests")?,
                    error_count: row.try_get("error_count")?,
                })
            })
            .collect()
    }

    async fn bucket_averages(
        &self,
        scheme: IdScheme,
        bucket_ms: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BucketAverage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                timestamp_ms - (timestamp_ms % ?) AS bucket,
                AVG(total_duration) AS avg_duration,
                COUNT(*) AS request_count
            FROM route_metrics
            WHERE id_type = ? AND timestamp_ms >= ?
            GROUP BY bucket
            ORDER BY bucket DESC
            LIMIT ?
            "#,
        )
        .bind(bucket_ms)
        .bind(scheme.as_str())
        .bind(since.timestamp_millis())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // Newest buckets were kept; hand them back oldest first.
        let mut buckets = rows
            .iter()
            .map(|row| -> Result<BucketAverage, StoreError> {
                Ok(BucketAverage {
                    bucket_start_ms: row.try_get("bucket")?,
                    avg_duration: row.try_get("avg_duration")?,
                    request_count: row.try_get("request_count")?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        buckets.reverse();
        Ok(buckets)
    }

    async fn bucket_error_counts(
        &self,
        scheme: IdScheme,
        bucket_ms: i64,
        limit: i64,
    ) -> Result<Vec<BucketCounts>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                timestamp_ms - (timestamp_ms % ?) AS bucket,
                COUNT(*) AS request_count,
                SUM(CASE WHEN is_error THEN 1 ELSE 0 END) AS error_count
            FROM route_metrics
            WHERE id_type = ?
            GROUP BY bucket
            ORDER BY bucket ASC
            LIMIT ?
            "#,
        )
        .bind(bucket_ms)
        .bind(scheme.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<BucketCounts, StoreError> {
                Ok(BucketCounts {
                    bucket_start_ms: row.try_get("bucket")?,
                    request_count: row.try_get("request_count")?,
                    error_count: row.try_get("error_count")?,
                })
            })
            .collect()
    }

    async fn bucket_durations(
        &self,
        scheme: IdScheme,
        bucket_ms: i64,
    ) -> Result<Vec<BucketSamples>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp_ms - (timestamp_ms % ?) AS bucket, total_duration
            FROM route_metrics
            WHERE id_type = ?
            ORDER BY bucket ASC, total_duration ASC
            "#,
        )
        .bind(bucket_ms)
        .bind(scheme.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut buckets: Vec<BucketSamples> = Vec::new();
        for row in &rows {
            let bucket: i64 = row.try_get("bucket")?;
            let duration: f64 = row.try_get("total_duration")?;
            match buckets.last_mut() {
                Some(current) if current.bucket_start_ms == bucket => {
                    current.durations.push(duration)
                }
                _ => buckets.push(BucketSamples {
                    bucket_start_ms: bucket,
                    durations: vec![duration],
                }),
            }
        }
        Ok(buckets)
    }
}

#[async_trait]
impl TableIntrospector for SqliteStore {
    async fn id_column_stats(&self) -> Result<Vec<IdColumnStats>, StoreError> {
        let mut stats = Vec::with_capacity(IdScheme::ALL.len());
        for table in IdScheme::ALL.iter().filter_map(|s| s.table()) {
            let sql = format!(
                "SELECT COUNT(*) AS row_count, \
                 COALESCE(AVG({ID_BYTES_EXPR}), 0.0) AS avg_id_bytes \
                 FROM {table}"
            );
            let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
            stats.push(IdColumnStats {
                table_name: table.to_string(),
                row_count: row.try_get("row_count")?,
                avg_id_bytes: row.try_get("avg_id_bytes")?,
            });
        }
        Ok(stats)
    }

    async fn table_sizes(&self) -> Result<Vec<RawTableSize>, StoreError> {
        let mut sizes = Vec::with_capacity(IdScheme::ALL.len());
        for table in IdScheme::ALL.iter().filter_map(|s| s.table()) {
            // created_at and updated_at are 8-byte integers.
            let sql = format!(
                "SELECT COUNT(*) AS row_count, COALESCE(SUM( \
                     ({ID_BYTES_EXPR}) \
                     + length(CAST(user_name AS BLOB)) \
                     + length(CAST(first_name AS BLOB)) \
                     + length(CAST(last_name AS BLOB)) \
                     + length(CAST(email AS BLOB)) \
                     + COALESCE(length(CAST(department AS BLOB)), 0) \
                     + 16), 0) AS size_bytes \
                 FROM {table}"
            );
            let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
            sizes.push(RawTableSize {
                table_name: table.to_string(),
                row_count: row.try_get("row_count")?,
                size_bytes: row.try_get("size_bytes")?,
            });
        }
        Ok(sizes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Duration;

    fn observation(scheme: IdScheme, method: &str, total: f64, is_error: bool) -> Observation {
        Observation {
            route_path: format!("/{}", scheme.slug().unwrap_or("other")),
            http_method: method.to_string(),
            id_scheme: scheme,
            total_duration_ms: total,
            db_duration_ms: total / 2.0,
            handler_duration_ms: total - total / 2.0,
            status_code: if is_error { 500 } else { 200 },
            is_error,
            response_size_bytes: 64,
            request_id: "req".to_string(),
            timestamp: Utc::now(),
            user_agent: "test-agent".to_string(),
            client_ip: "127.0.0.1".to_string(),
            error_message: is_error.then(|| "boom".to_string()),
        }
    }

    async fn store() -> SqliteStore {
        SqliteStore::new(db::memory_pool().await)
    }

    #[tokio::test]
    async fn insert_persists_every_column() {
        let store = store().await;
        let o = observation(IdScheme::Ulid, "GET", 12.345_678, true);
        store.insert(&o).await.unwrap();

        let row = sqlx::query("SELECT * FROM route_metrics")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("route_path"), "/ulid");
        assert_eq!(row.get::<String, _>("id_type"), "ULID");
        assert_eq!(row.get::<f64, _>("total_duration"), 12.345_678);
        assert_eq!(row.get::<i64, _>("status_code"), 500);
        assert!(row.get::<bool, _>("is_error"));
        assert_eq!(row.get::<Option<String>, _>("error_message").as_deref(), Some("boom"));
        assert_eq!(row.get::<i64, _>("timestamp_ms"), o.timestamp.timestamp_millis());
    }

    #[tokio::test]
    async fn scheme_averages_skip_errors() {
        let store = store().await;
        store.insert(&observation(IdScheme::Ksuid, "POST", 10.0, false)).await.unwrap();
        store.insert(&observation(IdScheme::Ksuid, "POST", 20.0, false)).await.unwrap();
        store.insert(&observation(IdScheme::Ksuid, "POST", 1.0, true)).await.unwrap();

        let averages = store.scheme_averages().await.unwrap();
        assert_eq!(averages.len(), 1);
        assert_eq!(averages[0].id_type, IdScheme::Ksuid);
        assert_eq!(averages[0].avg_duration, 15.0);
        assert_eq!(averages[0].request_count, 2);
    }

    #[tokio::test]
    async fn durations_apply_every_filter() {
        let store = store().await;
        store.insert(&observation(IdScheme::Cuid, "GET", 30.0, false)).await.unwrap();
        store.insert(&observation(IdScheme::Cuid, "GET", 10.0, false)).await.unwrap();
        store.insert(&observation(IdScheme::Cuid, "POST", 20.0, false)).await.unwrap();
        store.insert(&observation(IdScheme::Cuid, "GET", 5.0, true)).await.unwrap();
        store.insert(&observation(IdScheme::Ulid, "GET", 1.0, false)).await.unwrap();

        let filter = DurationFilter {
            http_method: Some("GET".to_string()),
            since: Some(Utc::now() - Duration::hours(1)),
            ..DurationFilter::for_scheme(IdScheme::Cuid)
        };
        assert_eq!(store.durations(&filter).await.unwrap(), [10.0, 30.0]);

        let with_errors = DurationFilter {
            include_errors: true,
            ..filter.clone()
        };
        assert_eq!(store.durations(&with_errors).await.unwrap(), [5.0, 10.0, 30.0]);

        let future = DurationFilter {
            since: Some(Utc::now() + Duration::hours(1)),
            ..filter
        };
        assert!(store.durations(&future).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bucket_durations_group_by_bucket() {
        let store = store().await;
        let mut early = observation(IdScheme::NanoId, "GET", 7.0, false);
        early.timestamp = DateTime::from_timestamp_millis(3_600_000 + 5).unwrap();
        let mut early2 = observation(IdScheme::NanoId, "GET", 3.0, false);
        early2.timestamp = DateTime::from_timestamp_millis(3_600_000 + 10).unwrap();
        let mut late = observation(IdScheme::NanoId, "GET", 1.0, false);
        late.timestamp = DateTime::from_timestamp_millis(7_200_000 + 1).unwrap();
        for o in [&early, &early2, &late] {
            store.insert(o).await.unwrap();
        }

        let buckets = store.bucket_durations(IdScheme::NanoId, 3_600_000).await.unwrap();
        assert_eq!(
            buckets,
            vec![
                BucketSamples {
                    bucket_start_ms: 3_600_000,
                    durations: vec![3.0, 7.0],
                },
                BucketSamples {
                    bucket_start_ms: 7_200_000,
                    durations: vec![1.0],
                },
            ]
        );
    }

    #[tokio::test]
    async fn bucket_averages_keep_newest_ascending() {
        let store = store().await;
        for hour in 0..5i64 {
            let mut o = observation(IdScheme::Snowflake, "GET", hour as f64, false);
            o.timestamp = DateTime::from_timestamp_millis(hour * 3_600_000).unwrap();
            store.insert(&o).await.unwrap();
        }

        let since = DateTime::from_timestamp_millis(0).unwrap();
        let buckets = store
            .bucket_averages(IdScheme::Snowflake, 3_600_000, since, 3)
            .await
            .unwrap();
        let starts: Vec<i64> = buckets.iter().map(|b| b.bucket_start_ms).collect();
        assert_eq!(starts, [2 * 3_600_000, 3 * 3_600_000, 4 * 3_600_000]);
    }

    #[tokio::test]
    async fn empty_tables_report_zero_sizes() {
        let store = store().await;
        let stats = store.id_column_stats().await.unwrap();
        assert_eq!(stats.len(), IdScheme::ALL.len());
        assert!(stats.iter().all(|s| s.row_count == 0 && s.avg_id_bytes == 0.0));

        let sizes = store.table_sizes().await.unwrap();
        assert!(sizes.iter().all(|s| s.row_count == 0 && s.size_bytes == 0));
    }
}
