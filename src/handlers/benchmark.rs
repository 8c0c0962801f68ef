use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::load_generator::{self, LoadConfig, LoadReport};
use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkConfig {
    /// Create requests sent to each scheme
    #[serde(default = "default_requests")]
    pub requests: u32,

    /// In-flight requests per scheme
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Per-request client timeout (ms)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_requests() -> u32 {
    1_000
}
fn default_concurrency() -> u32 {
    10
}
fn default_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Serialize)]
pub struct BenchmarkStatus {
    pub running: bool,
    pub message: String,
    /// Outcome of the most recent finished run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<LoadReport>,
}

// ─── POST /api/benchmark/start ───────────────────────────────────

pub async fn start_benchmark(
    State(state): State<Arc<AppState>>,
    Json(config): Json<BenchmarkConfig>,
) -> Result<Json<BenchmarkStatus>, AppError> {
    if config.requests == 0 || config.requests > 100_000 {
        return Err(AppError::BadRequest(
            "requests must be between 1 and 100000".into(),
        ));
    }
    if config.timeout_ms == 0 || config.timeout_ms > 60_000 {
        return Err(AppError::BadRequest(
            "timeout_ms must be between 1 and 60000".into(),
        ));
    }
    let load = LoadConfig {
        base_url: state.base_url.clone(),
        requests: config.requests,
        concurrency: config.concurrency,
        timeout: Duration::from_millis(config.timeout_ms),
        delay: Duration::ZERO,
    };
    load.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    // Guard: only one benchmark at a time
    if state
        .load_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(AppError::AlreadyRunning);
    }

    let msg = format!(
        "Started: {} requests per scheme, {} in flight",
        config.requests, config.concurrency,
    );

    let running = state.load_running.clone();
    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        match load_generator::run(load, running.clone()).await {
            Ok(report) => *task_state.last_report.lock() = Some(report),
            Err(err) => warn!(error = %err, "benchmark failed"),
        }
        running.store(false, Ordering::SeqCst);
    });

    // Stash the handle so `stop` can await clean shutdown
    let mut guard = state.load_handle.lock().await;
    *guard = Some(handle);

    info!(requests = config.requests, concurrency = config.concurrency, "benchmark started");
    Ok(Json(BenchmarkStatus {
        running: true,
        message: msg,
        last_report: None,
    }))
}

// ─── POST /api/benchmark/stop ────────────────────────────────────

pub async fn stop_benchmark(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BenchmarkStatus>, AppError> {
    if !state.load_running.load(Ordering::SeqCst) {
        return Ok(Json(BenchmarkStatus {
            running: false,
            message: "No benchmark is running".into(),
            last_report: state.last_report.lock().clone(),
        }));
    }

    // Signal all workers to stop
    state.load_running.store(false, Ordering::SeqCst);

    // Await the load-generator task so the report is in place
    let mut guard = state.load_handle.lock().await;
    if let Some(handle) = guard.take() {
        if let Err(err) = handle.await {
            warn!(error = %err, "benchmark task ended abnormally");
        }
    }

    Ok(Json(BenchmarkStatus {
        running: false,
        message: "Benchmark stopped".into(),
        last_report: state.last_report.lock().clone(),
    }))
}

// ─── GET /api/benchmark/status ───────────────────────────────────

pub async fn benchmark_status(State(state): State<Arc<AppState>>) -> Json<BenchmarkStatus> {
    let running = state.load_running.load(Ordering::SeqCst);
    Json(BenchmarkStatus {
        running,
        message: if running {
            "Benchmark in progress".into()
        } else {
            "Idle".into()
        },
        last_report: state.last_report.lock().clone(),
    })
}
