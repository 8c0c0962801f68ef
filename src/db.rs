use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::ids::{IdKind, IdScheme};

/// Connections kept open against a file-backed database.
const MAX_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT_SECS: u64 = 5;

const ROUTE_METRICS_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS route_metrics (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        route_path        TEXT    NOT NULL,
        http_method       TEXT    NOT NULL,
        id_type           TEXT    NOT NULL,
        total_duration    REAL    NOT NULL,
        db_query_duration REAL    NOT NULL,
        handler_duration  REAL    NOT NULL,
        status_code       INTEGER NOT NULL,
        response_size     INTEGER NOT NULL DEFAULT 0,
        is_error          INTEGER NOT NULL DEFAULT 0,
        error_message     TEXT,
        request_id        TEXT    NOT NULL DEFAULT '',
        timestamp_ms      INTEGER NOT NULL,
        user_agent        TEXT    NOT NULL DEFAULT '',
        ip_address        TEXT    NOT NULL DEFAULT ''
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_route_metrics_id_type ON route_metrics (id_type)",
    "CREATE INDEX IF NOT EXISTS idx_route_metrics_timestamp ON route_metrics (timestamp_ms)",
    "CREATE INDEX IF NOT EXISTS idx_route_metrics_route ON route_metrics (route_path, http_method)",
    "CREATE INDEX IF NOT EXISTS idx_route_metrics_error ON route_metrics (is_error)",
];

/// Opens the pool and creates any missing tables.
///
/// In-memory databases live and die with their connection, so they get a
/// single connection that is never recycled.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = url.contains(":memory:") || url.contains("mode=memory");

    let mut options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS));
    if !in_memory {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
    };

    let pool = pool_options.connect_with(options).await?;
    init_schema(&pool).await?;

    tracing::debug!(url, in_memory, "database ready");
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in ROUTE_METRICS_SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    for scheme in IdScheme::ALL {
        if let Some(ddl) = users_table_ddl(scheme) {
            sqlx::query(&ddl).execute(pool).await?;
        }
    }
    Ok(())
}

/// One users table per scheme; only the id column type differs.
fn users_table_ddl(scheme: IdScheme) -> Option<String> {
    let table = scheme.table()?;
    let id_type = match scheme.kind() {
        IdKind::Text => "TEXT",
        IdKind::Integer => "INTEGER",
        IdKind::Uuid => "BLOB",
    };
    Some(format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id          {id_type} PRIMARY KEY NOT NULL,
            user_name   TEXT    NOT NULL,
            first_name  TEXT    NOT NULL,
            last_name   TEXT    NOT NULL,
            email       TEXT    NOT NULL,
            department  TEXT,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        )
        "#
    ))
}

#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    connect("sqlite::memory:").await.unwrap()
}
