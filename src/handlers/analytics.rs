use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ids::IdScheme;
use crate::metrics::analytics::{window_hours, BucketInterval};
use crate::metrics::views::{
    ErrorRate, ErrorRateTrend, IdEfficiency, MethodPercentiles, PercentileTrend, RoutePerformance,
    SchemePerformance, TableSize, TimeSeriesPoint,
};
use crate::AppState;

use super::AppError;

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SchemeDetails {
    pub id_type: IdScheme,
    pub routes: Vec<RoutePerformance>,
}

#[derive(Debug, Serialize)]
pub struct SchemePercentiles {
    pub id_type: IdScheme,
    pub hours: i64,
    pub methods: BTreeMap<String, MethodPercentiles>,
}

#[derive(Debug, Serialize)]
pub struct SchemeSeries<T> {
    pub id_type: IdScheme,
    pub points: Vec<T>,
}

/// `{type}` accepts the display name or the route slug, in any case.
fn scheme(raw: &str) -> Result<IdScheme, AppError> {
    Ok(raw.parse::<IdScheme>()?)
}

// ─── GET /analytics/comparison ───────────────────────────────────

pub async fn comparison(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SchemePerformance>>, AppError> {
    Ok(Json(state.analytics.average_by_scheme().await?))
}

// ─── GET /analytics/:type/details ────────────────────────────────

pub async fn details(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Json<SchemeDetails>, AppError> {
    let id_type = scheme(&raw)?;
    let routes = state.analytics.performance_by_route(id_type).await?;
    Ok(Json(SchemeDetails { id_type, routes }))
}

// ─── GET /analytics/:type/percentiles?hours= ─────────────────────

pub async fn percentiles(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<SchemePercentiles>, AppError> {
    let id_type = scheme(&raw)?;
    let methods = state.analytics.percentiles(id_type, window.hours).await?;
    Ok(Json(SchemePercentiles {
        id_type,
        hours: window_hours(window.hours),
        methods,
    }))
}

// ─── GET /analytics/errors ───────────────────────────────────────

pub async fn errors(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ErrorRate>>, AppError> {
    Ok(Json(state.analytics.error_rates().await?))
}

// ─── GET /analytics/:type/timeseries?hours= ──────────────────────

pub async fn time_series(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<SchemeSeries<TimeSeriesPoint>>, AppError> {
    let id_type = scheme(&raw)?;
    let points = state
        .analytics
        .time_series(id_type, BucketInterval::Hour, window.hours)
        .await?;
    Ok(Json(SchemeSeries { id_type, points }))
}

// ─── GET /analytics/:type/error-trend ────────────────────────────

pub async fn error_trend(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Json<SchemeSeries<ErrorRateTrend>>, AppError> {
    let id_type = scheme(&raw)?;
    let points = state.analytics.error_rate_trend(id_type).await?;
    Ok(Json(SchemeSeries { id_type, points }))
}

// ─── GET /analytics/:type/duration-trend ─────────────────────────

pub async fn duration_trend(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Json<SchemeSeries<PercentileTrend>>, AppError> {
    let id_type = scheme(&raw)?;
    let points = state.analytics.duration_trend(id_type).await?;
    Ok(Json(SchemeSeries { id_type, points }))
}

// ─── GET /analytics/tables ───────────────────────────────────────

pub async fn tables(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TableSize>>, AppError> {
    Ok(Json(state.efficiency.table_report().await?))
}

// ─── GET /analytics/efficiency ───────────────────────────────────

pub async fn efficiency(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<IdEfficiency>>, AppError> {
    Ok(Json(state.efficiency.efficiency_report().await?))
}
