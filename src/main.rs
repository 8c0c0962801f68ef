use anyhow::Context;
use clap::Parser;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod db;
mod handlers;
mod ids;
mod load_generator;
mod metrics;
mod middleware;
mod repository;
mod seed;
mod server;

use config::{Cli, Commands, GenerateArgs, LoadTestArgs, ServerArgs};
use ids::{generator_for, IdScheme};
use load_generator::LoadReport;
use metrics::{EfficiencyScorer, MetricsAnalytics, SqliteStore};
use middleware::MetricsRecorder;
use repository::{RepoError, UserRepository};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Read-side reducers over the recorded observations.
    pub analytics: MetricsAnalytics,

    /// Id-width and table-size reports over the users tables.
    pub efficiency: EfficiencyScorer,

    /// Fire-and-forget sink used by the capture middleware.
    pub recorder: MetricsRecorder,

    /// One repository per benchmarked scheme.
    pub users: Vec<UserRepository>,

    /// Loopback URL the in-process benchmark targets.
    pub base_url: String,

    /// Flag checked by every load-generator worker before each request.
    pub load_running: Arc<AtomicBool>,

    /// Handle to the spawned load-generator task so we can await clean shutdown.
    pub load_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,

    /// Report of the last finished benchmark.
    pub last_report: parking_lot::Mutex<Option<LoadReport>>,
}

impl AppState {
    /// Wires every component to the one pool.
    pub fn new(pool: SqlitePool, base_url: String) -> Result<Self, RepoError> {
        let store = Arc::new(SqliteStore::new(pool.clone()));

        let users = IdScheme::ALL
            .into_iter()
            .filter_map(generator_for)
            .map(|g| UserRepository::new(pool.clone(), g))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            analytics: MetricsAnalytics::new(store.clone()),
            efficiency: EfficiencyScorer::new(store.clone()),
            recorder: MetricsRecorder::new(store),
            users,
            base_url,
            load_running: Arc::new(AtomicBool::new(false)),
            load_handle: tokio::sync::Mutex::new(None),
            last_report: parking_lot::Mutex::new(None),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{},tower_http=info,sqlx=warn", cli.log_level))
        }))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();

    let command = cli
        .command
        .unwrap_or_else(|| Commands::Server(ServerArgs::default()));

    match command {
        Commands::Server(args) => serve(&cli.database_url, args).await,
        Commands::Generate(args) => generate(&cli.database_url, args).await,
        Commands::LoadTest(args) => load_test(args).await,
    }
}

// ─── server ──────────────────────────────────────────────────────

async fn serve(database_url: &str, args: ServerArgs) -> anyhow::Result<()> {
    info!(database_url, "opening database");
    let pool = db::connect(database_url)
        .await
        .with_context(|| format!("cannot open database at {database_url}"))?;

    let state = Arc::new(AppState::new(pool.clone(), args.local_url())?);
    let app = server::create_router(state.clone());

    let addr = args.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}; is it already in use?"))?;

    info!(
        address = %addr,
        comparison = %format!("{}/analytics/comparison", args.local_url()),
        stream = %format!("{}/analytics/stream", args.local_url()),
        "server listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server exited with error")?;

    // Let a running benchmark wind down before the pool closes.
    state.load_running.store(false, Ordering::SeqCst);
    if let Some(handle) = state.load_handle.lock().await.take() {
        let _ = handle.await;
    }
    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ─── generate ────────────────────────────────────────────────────

async fn generate(database_url: &str, args: GenerateArgs) -> anyhow::Result<()> {
    let pool = db::connect(database_url)
        .await
        .with_context(|| format!("cannot open database at {database_url}"))?;

    let summaries = seed::generate(&pool, args.records, args.batch).await?;
    for s in &summaries {
        println!(
            "  {:<16} {:>8} rows  {:>9.1} ms",
            s.table, s.rows, s.elapsed_ms
        );
    }
    pool.close().await;
    Ok(())
}

// ─── load-test ───────────────────────────────────────────────────

async fn load_test(args: LoadTestArgs) -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));

    let flag = running.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; finishing in-flight requests");
            flag.store(false, Ordering::SeqCst);
        }
    });

    let report = load_generator::run(args.into(), running).await?;

    println!();
    println!(
        "  {:<10} {:>8} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "scheme", "requests", "success%", "mean ms", "p50 ms", "p95 ms", "p99 ms"
    );
    for s in &report.schemes {
        println!(
            "  {:<10} {:>8} {:>9.2} {:>9.2} {:>9.2} {:>9.2} {:>9.2}",
            s.id_type.as_str(),
            s.requests,
            s.success_rate,
            s.latency.mean_ms,
            s.latency.p50_ms,
            s.latency.p95_ms,
            s.latency.p99_ms,
        );
    }
    println!();
    Ok(())
}
