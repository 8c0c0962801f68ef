use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::views::{ErrorRate, SchemePerformance};
use super::MetricsAnalytics;
use crate::AppState;

const TICK: Duration = Duration::from_secs(2);

/// One push of the live dashboard feed.
#[derive(Debug, Serialize)]
pub struct LiveSnapshot {
    pub generated_at: DateTime<Utc>,
    pub comparison: Vec<SchemePerformance>,
    pub errors: Vec<ErrorRate>,
}

async fn snapshot(analytics: &MetricsAnalytics) -> Result<LiveSnapshot, super::StoreError> {
    Ok(LiveSnapshot {
        generated_at: Utc::now(),
        comparison: analytics.average_by_scheme().await?,
        errors: analytics.error_rates().await?,
    })
}

// ─── GET /analytics/stream ───────────────────────────────────────
/// Server-Sent Events endpoint.
/// Recomputes the scheme comparison and error rates every 2 s and pushes
/// them as one JSON event. A failed query becomes an `error` event; the
/// feed keeps ticking.

pub async fn analytics_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Event>(1);
    let analytics = state.analytics.clone();

    tokio::spawn(async move {
        let mut ticks = IntervalStream::new(tokio::time::interval(TICK));
        while ticks.next().await.is_some() {
            let event = match snapshot(&analytics).await {
                Ok(snap) => Event::default().data(serde_json::to_string(&snap).unwrap_or_default()),
                Err(err) => {
                    warn!(error = %err, "live snapshot failed");
                    Event::default().event("error").data(err.to_string())
                }
            };
            if tx.send(event).await.is_err() {
                debug!("stream client went away");
                break;
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<Event, Infallible>);

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
