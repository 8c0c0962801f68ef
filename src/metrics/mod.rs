pub mod analytics;
pub mod efficiency;
pub mod percentiles;
pub mod sqlite;
pub mod store;
pub mod stream;
pub mod views;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ids::IdScheme;

pub use analytics::MetricsAnalytics;
pub use efficiency::EfficiencyScorer;
pub use sqlite::SqliteStore;
pub use store::{MetricsStore, StoreError, TableIntrospector};

/// One completed request, as recorded by the capture middleware.
/// This is the "write" side: created once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Matched route pattern, e.g. "/ksuid/:id"
    pub route_path: String,
    pub http_method: String,
    pub id_scheme: IdScheme,
    /// Wall time of the whole request (ms)
    pub total_duration_ms: f64,
    /// Time the handler reported spending in the database (ms)
    pub db_duration_ms: f64,
    /// `total_duration_ms - db_duration_ms`, fixed at capture time
    pub handler_duration_ms: f64,
    pub status_code: u16,
    pub is_error: bool,
    pub response_size_bytes: u64,
    pub request_id: String,
    /// When the request started
    pub timestamp: DateTime<Utc>,
    pub user_agent: String,
    pub client_ip: String,
    pub error_message: Option<String>,
}

/// Phase timings of one request, before they are frozen into an [`Observation`].
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimings {
    pub total_ms: f64,
    pub db_ms: f64,
}

impl PhaseTimings {
    /// Clamps the database phase into `[0, total]` so the handler phase is
    /// never negative.
    pub fn new(total_ms: f64, db_ms: f64) -> Self {
        let total_ms = total_ms.max(0.0);
        Self {
            total_ms,
            db_ms: db_ms.clamp(0.0, total_ms),
        }
    }

    pub fn handler_ms(&self) -> f64 {
        self.total_ms - self.db_ms
    }
}
