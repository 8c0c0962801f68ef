use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use crate::load_generator::LoadConfig;

pub const ENV_DATABASE_URL: &str = "ID_TRIALS_DATABASE_URL";
pub const ENV_HOST: &str = "ID_TRIALS_HOST";
pub const ENV_PORT: &str = "ID_TRIALS_PORT";

#[derive(Debug, Parser)]
#[command(name = "id-trials")]
#[command(version, about = "Identifier scheme latency and storage benchmark", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// SQLite database URL
    #[arg(long, global = true, env = ENV_DATABASE_URL, default_value = "sqlite://id_trials.db")]
    pub database_url: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP service (default)
    Server(ServerArgs),
    /// Seed every scheme table with synthetic users
    Generate(GenerateArgs),
    /// Drive the create endpoints of every scheme and report latencies
    LoadTest(LoadTestArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    /// Address to bind
    #[arg(long, short = 'H', env = ENV_HOST, default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, short = 'p', env = ENV_PORT, default_value_t = 3000)]
    pub port: u16,
}

/// Used when no subcommand is given; still honours the environment.
impl Default for ServerArgs {
    fn default() -> Self {
        Self {
            host: std::env::var(ENV_HOST).unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var(ENV_PORT)
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
        }
    }
}

impl ServerArgs {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Loopback URL of this server, used by in-process benchmarks.
    pub fn local_url(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
            other => other,
        };
        format!("http://{host}:{}", self.port)
    }
}

#[derive(Debug, Clone, Args)]
pub struct GenerateArgs {
    /// Users inserted into each scheme table
    #[arg(long, default_value_t = 10_000)]
    pub records: u64,

    /// Rows per INSERT statement
    #[arg(long, default_value_t = 1_000)]
    pub batch: u64,
}

#[derive(Debug, Clone, Args)]
pub struct LoadTestArgs {
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub base_url: String,

    /// Create requests per scheme
    #[arg(long, default_value_t = 1_000)]
    pub requests: u32,

    /// In-flight requests per scheme
    #[arg(long, default_value_t = 10)]
    pub concurrency: u32,

    #[arg(long, default_value_t = 5_000)]
    pub timeout_ms: u64,

    /// Pause after each request
    #[arg(long, default_value_t = 0)]
    pub delay_ms: u64,
}

impl From<LoadTestArgs> for LoadConfig {
    fn from(args: LoadTestArgs) -> Self {
        LoadConfig {
            base_url: args.base_url,
            requests: args.requests,
            concurrency: args.concurrency,
            timeout: Duration::from_millis(args.timeout_ms),
            delay: Duration::from_millis(args.delay_ms),
        }
    }
}
