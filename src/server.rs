use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{self, analytics, benchmark, users};
use crate::metrics::stream;
use crate::middleware::{capture_metrics, MetricsRecorder};
use crate::repository::UserRepository;
use crate::AppState;

/// Builds the full Axum `Router`: captured CRUD routes per scheme plus the
/// uncaptured analytics and benchmark routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // ── Analytics ───────────────────────────────────────────
        .route("/analytics/comparison", get(analytics::comparison))
        .route("/analytics/errors", get(analytics::errors))
        .route("/analytics/tables", get(analytics::tables))
        .route("/analytics/efficiency", get(analytics::efficiency))
        .route("/analytics/stream", get(stream::analytics_stream))
        .route("/analytics/:type/details", get(analytics::details))
        .route("/analytics/:type/percentiles", get(analytics::percentiles))
        .route("/analytics/:type/timeseries", get(analytics::time_series))
        .route("/analytics/:type/error-trend", get(analytics::error_trend))
        .route("/analytics/:type/duration-trend", get(analytics::duration_trend))
        // ── Benchmark control ───────────────────────────────────
        .route("/api/benchmark/start", post(benchmark::start_benchmark))
        .route("/api/benchmark/stop", post(benchmark::stop_benchmark))
        .route("/api/benchmark/status", get(benchmark::benchmark_status))
        .with_state(state.clone());

    // ── One captured CRUD router per scheme ─────────────────────
    for repo in &state.users {
        router = router.merge(scheme_routes(repo.clone(), state.recorder.clone()));
    }

    router
        .fallback(|| async { handlers::AppError::NotFound("no such route".into()) })
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// `/<slug>` and `/<slug>/:id` for one scheme, each request recorded by the
/// capture middleware.
fn scheme_routes(repo: UserRepository, recorder: MetricsRecorder) -> Router {
    let Some(slug) = repo.scheme().slug() else {
        return Router::new();
    };

    Router::new()
        .route(
            &format!("/{slug}"),
            get(users::list_users).post(users::create_user),
        )
        .route(
            &format!("/{slug}/:id"),
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route_layer(axum_mw::from_fn_with_state(recorder, capture_metrics))
        .with_state(repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::ids::IdScheme;
    use crate::metrics::store::{BucketSamples, DurationFilter};
    use crate::metrics::views::{
        BucketAverage, BucketCounts, ErrorCounts, IdColumnStats, RawTableSize, RouteAggregate,
        SchemePerformance,
    };
    use crate::metrics::{
        EfficiencyScorer, MetricsAnalytics, MetricsStore, Observation, StoreError,
        TableIntrospector,
    };
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Backing store whose every read and write fails.
    struct OfflineStore;

    fn offline<T>() -> Result<T, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolClosed))
    }

    #[async_trait]
    impl MetricsStore for OfflineStore {
        async fn insert(&self, _: &Observation) -> Result<(), StoreError> {
            offline()
        }
        async fn scheme_averages(&self) -> Result<Vec<SchemePerformance>, StoreError> {
            offline()
        }
        async fn route_aggregates(&self, _: IdScheme) -> Result<Vec<RouteAggregate>, StoreError> {
            offline()
        }
        async fn durations(&self, _: &DurationFilter) -> Result<Vec<f64>, StoreError> {
            offline()
        }
        async fn error_counts(&self) -> Result<Vec<ErrorCounts>, StoreError> {
            offline()
        }
        async fn bucket_averages(
            &self,
            _: IdScheme,
            _: i64,
            _: DateTime<Utc>,
            _: i64,
        ) -> Result<Vec<BucketAverage>, StoreError> {
            offline()
        }
        async fn bucket_error_counts(
            &self,
            _: IdScheme,
            _: i64,
            _: i64,
        ) -> Result<Vec<BucketCounts>, StoreError> {
            offline()
        }
        async fn bucket_durations(&self, _: IdScheme, _: i64) -> Result<Vec<BucketSamples>, StoreError> {
            offline()
        }
    }

    #[async_trait]
    impl TableIntrospector for OfflineStore {
        async fn id_column_stats(&self) -> Result<Vec<IdColumnStats>, StoreError> {
            offline()
        }
        async fn table_sizes(&self) -> Result<Vec<RawTableSize>, StoreError> {
            offline()
        }
    }

    fn offline_app() -> Router {
        let store = Arc::new(OfflineStore);
        let state = Arc::new(AppState {
            analytics: MetricsAnalytics::new(store.clone()),
            efficiency: EfficiencyScorer::new(store.clone()),
            recorder: MetricsRecorder::new(store),
            users: Vec::new(),
            base_url: "http://127.0.0.1:9".into(),
            load_running: Arc::new(AtomicBool::new(false)),
            load_handle: tokio::sync::Mutex::new(None),
            last_report: parking_lot::Mutex::new(None),
        });
        create_router(state)
    }

    async fn app() -> (Router, Arc<AppState>) {
        let pool = db::memory_pool().await;
        let state = Arc::new(AppState::new(pool, "http://127.0.0.1:9".into()).unwrap());
        (create_router(state.clone()), state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let req = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn new_user() -> Value {
        json!({
            "user_name": "ada",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
        })
    }

    /// Polls until the background observation writes are visible.
    async fn wait_for_requests(app: &Router, id_type: &str, expected: i64) -> Value {
        for _ in 0..100 {
            let (_, errors) = send(app, "GET", "/analytics/errors", None).await;
            let total = errors
                .as_array()
                .and_then(|rows| rows.iter().find(|r| r["id_type"] == id_type))
                .and_then(|r| r["total_requests"].as_i64())
                .unwrap_or(0);
            if total >= expected {
                return errors;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("observations for {id_type} never arrived");
    }

    #[tokio::test]
    async fn crud_round_trip_per_scheme() {
        let (app, _) = app().await;
        for slug in ["ulid", "uuid4", "ksuid", "cuid", "nano", "snow"] {
            let (status, created) = send(&app, "POST", &format!("/{slug}"), Some(new_user())).await;
            assert_eq!(status, StatusCode::CREATED, "{slug}");
            let id = created["id"].as_str().unwrap().to_string();

            let (status, fetched) = send(&app, "GET", &format!("/{slug}/{id}"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(fetched["email"], "ada@example.com");

            let (status, updated) = send(
                &app,
                "PUT",
                &format!("/{slug}/{id}"),
                Some(json!({ "department": "Analytics" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(updated["department"], "Analytics");

            let (status, page) = send(&app, "GET", &format!("/{slug}?search=love"), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(page["total"], 1);

            let (status, _) = send(&app, "DELETE", &format!("/{slug}/{id}"), None).await;
            assert_eq!(status, StatusCode::NO_CONTENT);
            let (status, body) = send(&app, "GET", &format!("/{slug}/{id}"), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["status"], 404);
        }
    }

    #[tokio::test]
    async fn malformed_ids_are_bad_requests() {
        let (app, _) = app().await;
        let (status, body) = send(&app, "GET", "/snow/not-a-number", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not-a-number"));

        let (status, _) = send(&app, "GET", "/uuid4/1234", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn captured_requests_feed_the_analytics() {
        let (app, _) = app().await;
        send(&app, "POST", "/ksuid", Some(new_user())).await;
        send(&app, "POST", "/ksuid", Some(new_user())).await;
        send(&app, "GET", "/ksuid/missing", None).await;

        let errors = wait_for_requests(&app, "KSUID", 3).await;
        let ksuid = errors
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["id_type"] == "KSUID")
            .unwrap();
        assert_eq!(ksuid["error_count"], 1);

        let (status, comparison) = send(&app, "GET", "/analytics/comparison", None).await;
        assert_eq!(status, StatusCode::OK);
        let row = comparison
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["id_type"] == "KSUID")
            .unwrap();
        assert_eq!(row["request_count"], 2);

        let (status, details) = send(&app, "GET", "/analytics/ksuid/details", None).await;
        assert_eq!(status, StatusCode::OK);
        let routes: Vec<&str> = details["routes"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|r| r["route_path"].as_str())
            .collect();
        assert!(routes.contains(&"/ksuid"));
        assert!(routes.contains(&"/ksuid/:id"));

        let (status, pct) = send(&app, "GET", "/analytics/KSUID/percentiles?hours=0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pct["hours"], 24);
        assert_eq!(pct["methods"]["POST"]["sample_count"], 2);
        assert_eq!(pct["methods"]["GET"]["sample_count"], 0);
    }

    #[tokio::test]
    async fn analytics_requests_are_not_captured() {
        let (app, state) = app().await;
        send(&app, "GET", "/analytics/comparison", None).await;
        send(&app, "GET", "/analytics/efficiency", None).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let rates = state.analytics.error_rates().await.unwrap();
        assert!(rates.iter().all(|r| r.total_requests == 0));
    }

    #[tokio::test]
    async fn unknown_scheme_is_a_bad_request() {
        let (app, _) = app().await;
        for uri in [
            "/analytics/bogus/details",
            "/analytics/bogus/percentiles",
            "/analytics/bogus/timeseries",
            "/analytics/bogus/error-trend",
            "/analytics/bogus/duration-trend",
        ] {
            let (status, body) = send(&app, "GET", uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["status"], 400);
        }
    }

    #[tokio::test]
    async fn oversized_windows_are_bad_requests() {
        let (app, _) = app().await;
        for uri in [
            "/analytics/ulid/percentiles?hours=9223372036854775807",
            "/analytics/ulid/timeseries?hours=9223372036854775807",
            "/analytics/ulid/percentiles?hours=10000000000",
        ] {
            let (status, body) = send(&app, "GET", uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["status"], 400);
            assert!(body["error"].as_str().unwrap().contains("out of range"));
        }
    }

    #[tokio::test]
    async fn failed_queries_are_server_errors() {
        let app = offline_app();
        for uri in [
            "/analytics/comparison",
            "/analytics/errors",
            "/analytics/ksuid/details",
            "/analytics/ksuid/percentiles",
            "/analytics/ksuid/duration-trend",
            "/analytics/efficiency",
            "/analytics/tables",
        ] {
            let (status, body) = send(&app, "GET", uri, None).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
            assert_eq!(body["status"], 500);
            assert!(body["error"].as_str().unwrap().starts_with("query failed"));
            // the error envelope is the whole body
            assert_eq!(body.as_object().unwrap().len(), 2, "{uri}");
        }
    }

    #[tokio::test]
    async fn storage_reports_cover_every_table() {
        let (app, _) = app().await;
        send(&app, "POST", "/snow", Some(new_user())).await;

        let (status, efficiency) = send(&app, "GET", "/analytics/efficiency", None).await;
        assert_eq!(status, StatusCode::OK);
        let rows = efficiency.as_array().unwrap();
        assert_eq!(rows.len(), 6);
        // one row is too few for a finite waste factor
        let snow = rows.iter().find(|r| r["table_name"] == "users_snowflake").unwrap();
        assert_eq!(snow["row_count"], 1);
        assert!(snow["waste_factor"].is_null());

        let (status, tables) = send(&app, "GET", "/analytics/tables", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tables[0]["table_name"], "users_snowflake");
        assert!(tables[0]["size_pretty"].as_str().unwrap().ends_with("bytes"));
    }

    #[tokio::test]
    async fn trend_endpoints_answer_for_idle_schemes() {
        let (app, _) = app().await;
        for uri in [
            "/analytics/cuid/timeseries?hours=6",
            "/analytics/cuid/error-trend",
            "/analytics/cuid/duration-trend",
        ] {
            let (status, body) = send(&app, "GET", uri, None).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body["id_type"], "CUID");
            assert!(body["points"].as_array().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn benchmark_controls() {
        let (app, state) = app().await;
        let (status, body) = send(&app, "GET", "/api/benchmark/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);

        let (status, _) = send(
            &app,
            "POST",
            "/api/benchmark/start",
            Some(json!({ "concurrency": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        state.load_running.store(true, std::sync::atomic::Ordering::SeqCst);
        let (status, body) = send(&app, "POST", "/api/benchmark/start", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], 409);
    }

    #[tokio::test]
    async fn unknown_routes_are_json_404s() {
        let (app, _) = app().await;
        let (status, body) = send(&app, "GET", "/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
    }
}
