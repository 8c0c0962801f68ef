use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::ids::IdScheme;
use crate::seed::random_user;

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("histogram: {0}")]
    Histogram(#[from] hdrhistogram::CreationError),

    #[error("{0}")]
    InvalidConfig(String),
}

// ─── Configuration ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Where the service under test listens, e.g. `http://127.0.0.1:3000`
    pub base_url: String,
    /// Create requests sent to each scheme
    pub requests: u32,
    /// In-flight requests allowed per scheme
    pub concurrency: u32,
    pub timeout: Duration,
    /// Pause each worker takes after its request
    pub delay: Duration,
}

impl LoadConfig {
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.concurrency == 0 || self.concurrency > 500 {
            return Err(LoadError::InvalidConfig(
                "concurrency must be between 1 and 500".into(),
            ));
        }
        if self.requests == 0 {
            return Err(LoadError::InvalidConfig("requests must be at least 1".into()));
        }
        if self.timeout.is_zero() {
            return Err(LoadError::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }
}

// ─── Reports ─────────────────────────────────────────────────────

/// Client-side latency of one scheme, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencySummary {
    /// Reads a microsecond histogram. Returns zeroed values if it is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::default();
        }
        let ms = |us: u64| us as f64 / 1000.0;
        Self {
            min_ms: ms(hist.min()),
            max_ms: ms(hist.max()),
            mean_ms: hist.mean() / 1000.0,
            p50_ms: ms(hist.value_at_quantile(0.50)),
            p95_ms: ms(hist.value_at_quantile(0.95)),
            p99_ms: ms(hist.value_at_quantile(0.99)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemeReport {
    pub id_type: IdScheme,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub latency: LatencySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: f64,
    /// Set when the run was stopped before every request was sent
    pub stopped_early: bool,
    pub schemes: Vec<SchemeReport>,
}

/// Counters one scheme's workers share.
struct SchemeTally {
    hist: Mutex<Histogram<u64>>,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl SchemeTally {
    fn new() -> Result<Self, LoadError> {
        Ok(Self {
            hist: Mutex::new(Histogram::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)?),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    fn record(&self, elapsed: Duration, ok: bool) {
        // clamp to ≥ 1 μs
        let us = (elapsed.as_micros() as u64).clamp(HIST_LOW, HIST_HIGH);
        let _ = self.hist.lock().record(us);
        if ok {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn report(&self, id_type: IdScheme) -> SchemeReport {
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let requests = successes + failures;
        SchemeReport {
            id_type,
            requests,
            successes,
            failures,
            success_rate: if requests > 0 {
                100.0 * successes as f64 / requests as f64
            } else {
                0.0
            },
            latency: LatencySummary::from_histogram(&self.hist.lock()),
        }
    }
}

// ─── Public entry point ──────────────────────────────────────────

/// Sends `requests` create calls to every scheme at once, at most
/// `concurrency` in flight per scheme, until done or until `running` is
/// cleared.
pub async fn run(config: LoadConfig, running: Arc<AtomicBool>) -> Result<LoadReport, LoadError> {
    config.validate()?;
    let client = reqwest::Client::builder().timeout(config.timeout).build()?;
    let started_at = Utc::now();
    let start = Instant::now();

    info!(
        base_url = %config.base_url,
        requests = config.requests,
        concurrency = config.concurrency,
        "load test started"
    );

    let mut schemes = JoinSet::new();
    for (i, scheme) in IdScheme::ALL.into_iter().enumerate() {
        let Some(slug) = scheme.slug() else {
            continue;
        };
        let tally = Arc::new(SchemeTally::new()?);
        let url = format!("{}/{slug}", config.base_url.trim_end_matches('/'));
        schemes.spawn(drive_scheme(
            scheme,
            i as u64,
            url,
            client.clone(),
            config.clone(),
            running.clone(),
            tally,
        ));
    }

    let mut reports = Vec::with_capacity(IdScheme::ALL.len());
    while let Some(joined) = schemes.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(err) => warn!(error = %err, "scheme driver panicked"),
        }
    }
    reports.sort_by_key(|r| r.id_type);

    let stopped_early = !running.load(Ordering::SeqCst);
    let report = LoadReport {
        started_at,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        stopped_early,
        schemes: reports,
    };
    info!(elapsed_ms = report.elapsed_ms, stopped_early, "load test finished");
    Ok(report)
}

// ─── Scheme driver ───────────────────────────────────────────────

async fn drive_scheme(
    scheme: IdScheme,
    index: u64,
    url: String,
    client: reqwest::Client,
    config: LoadConfig,
    running: Arc<AtomicBool>,
    tally: Arc<SchemeTally>,
) -> SchemeReport {
    let permits = Arc::new(Semaphore::new(config.concurrency as usize));
    let mut workers = JoinSet::new();

    for n in 0..u64::from(config.requests) {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        // Each request gets its own deterministic RNG seeded uniquely.
        let mut rng = StdRng::seed_from_u64(1000 + index * 1_000_000 + n);
        let body = random_user(&mut rng, n + 1);
        let client = client.clone();
        let url = url.clone();
        let tally = tally.clone();
        let delay = config.delay;

        workers.spawn(async move {
            let t0 = Instant::now();
            let ok = match client.post(&url).json(&body).send().await {
                Ok(res) => res.status().is_success(),
                Err(err) => {
                    debug!(url = %url, error = %err, "request failed");
                    false
                }
            };
            tally.record(t0.elapsed(), ok);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            drop(permit);
        });
    }

    while workers.join_next().await.is_some() {}

    let report = tally.report(scheme);
    info!(
        scheme = %scheme,
        requests = report.requests,
        success_rate = report.success_rate,
        p99_ms = report.latency.p99_ms,
        "scheme finished"
    );
    report
}
