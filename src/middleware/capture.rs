use axum::{
    async_trait,
    body::HttpBody,
    extract::{ConnectInfo, FromRequestParts, MatchedPath, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ids::IdScheme;
use crate::metrics::{MetricsStore, Observation, PhaseTimings};

// ─── Side channels ───────────────────────────────────────────────

/// Per-request accumulator for time spent in the database.
///
/// The capture middleware puts a fresh one into the request extensions;
/// handlers pull it out as an extractor and wrap their repository calls in
/// [`DbTiming::time`]. Outside the middleware it is a detached counter
/// that nobody reads.
#[derive(Debug, Clone, Default)]
pub struct DbTiming(Arc<AtomicU64>);

impl DbTiming {
    /// Awaits `fut` and adds its wall time to the counter.
    pub async fn time<F: Future>(&self, fut: F) -> F::Output {
        let start = Instant::now();
        let out = fut.await;
        self.record(start.elapsed());
        out
    }

    pub fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.0.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn total_ms(&self) -> f64 {
        self.0.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for DbTiming {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<DbTiming>().cloned().unwrap_or_default())
    }
}

/// Error text a handler attached to its response; set by `AppError`.
#[derive(Debug, Clone)]
pub struct HandlerError(pub String);

// ─── Persistence ─────────────────────────────────────────────────

/// Hands observations to the store on background tasks.
#[derive(Clone)]
pub struct MetricsRecorder {
    store: Arc<dyn MetricsStore>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    /// Persists `observation` on its own task. The returned handle may be
    /// dropped; a failed write is logged and the observation is lost.
    pub fn submit(&self, observation: Observation) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.insert(&observation).await {
                warn!(
                    route = %observation.route_path,
                    request_id = %observation.request_id,
                    error = %err,
                    "dropping observation"
                );
            }
        })
    }
}

// ─── Middleware ──────────────────────────────────────────────────

/// Measures every request, classifies it by id scheme and records one
/// [`Observation`] for it.
///
/// The response goes back exactly as the handler produced it, plus a
/// `Server-Timing` header; recording never delays it. Must be installed with
/// `route_layer` so the matched route pattern is available.
pub async fn capture_metrics(
    State(recorder): State<MetricsRecorder>,
    mut req: Request,
    next: Next,
) -> Response {
    let timestamp = Utc::now();
    let start = Instant::now();

    let route_path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let http_method = req.method().to_string();
    let request_id = header_value(req.headers(), "x-request-id")
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let user_agent = header_value(req.headers(), header::USER_AGENT.as_str()).unwrap_or_default();
    let client_ip = client_ip(&req);

    let db_timing = DbTiming::default();
    req.extensions_mut().insert(db_timing.clone());

    let mut response = next.run(req).await;

    let timings = PhaseTimings::new(start.elapsed().as_secs_f64() * 1000.0, db_timing.total_ms());
    let status = response.status();
    let error_message = response
        .extensions()
        .get::<HandlerError>()
        .map(|e| e.0.clone());

    // ── Inject response header ──────────────────────────────────
    let server_timing = format!(
        "total;dur={:.3}, db;dur={:.3}",
        timings.total_ms, timings.db_ms
    );
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    let observation = Observation {
        id_scheme: IdScheme::from_path(&route_path),
        route_path,
        http_method,
        total_duration_ms: timings.total_ms,
        db_duration_ms: timings.db_ms,
        handler_duration_ms: timings.handler_ms(),
        status_code: status.as_u16(),
        is_error: error_message.is_some() || status.as_u16() >= 400,
        response_size_bytes: response.body().size_hint().exact().unwrap_or(0),
        request_id,
        timestamp,
        user_agent,
        client_ip,
        error_message,
    };

    debug!(
        method = %observation.http_method,
        route = %observation.route_path,
        status = observation.status_code,
        total_ms = observation.total_duration_ms,
        db_ms = observation.db_duration_ms,
        "request captured"
    );

    recorder.submit(observation);
    response
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// First hop of `X-Forwarded-For`, else the peer address when the server was
/// started with connect info.
fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = header_value(req.headers(), "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_owned();
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}
