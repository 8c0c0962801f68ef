use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::middleware::DbTiming;
use crate::repository::{ListQuery, NewUser, User, UserPage, UserRepository, UserUpdate};

use super::AppError;

// Every scheme is served by these handlers; the router gives each scheme its
// own `UserRepository` as state. Repository calls run under `DbTiming` so
// the capture middleware can split database time from handler time.

// ─── GET /<scheme> ───────────────────────────────────────────────

pub async fn list_users(
    State(repo): State<UserRepository>,
    db: DbTiming,
    Query(query): Query<ListQuery>,
) -> Result<Json<UserPage>, AppError> {
    let page = db.time(repo.list(&query)).await?;
    Ok(Json(page))
}

// ─── GET /<scheme>/:id ───────────────────────────────────────────

pub async fn get_user(
    State(repo): State<UserRepository>,
    db: DbTiming,
    Path(raw_id): Path<String>,
) -> Result<Json<User>, AppError> {
    let id = repo.parse_id(&raw_id)?;
    db.time(repo.get(&id))
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&repo, &raw_id))
}

// ─── POST /<scheme> ──────────────────────────────────────────────

pub async fn create_user(
    State(repo): State<UserRepository>,
    db: DbTiming,
    Json(new): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = db.time(repo.create(new)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

// ─── PUT /<scheme>/:id ───────────────────────────────────────────

pub async fn update_user(
    State(repo): State<UserRepository>,
    db: DbTiming,
    Path(raw_id): Path<String>,
    Json(changes): Json<UserUpdate>,
) -> Result<Json<User>, AppError> {
    let id = repo.parse_id(&raw_id)?;
    db.time(repo.update(&id, changes))
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&repo, &raw_id))
}

// ─── DELETE /<scheme>/:id ────────────────────────────────────────

pub async fn delete_user(
    State(repo): State<UserRepository>,
    db: DbTiming,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = repo.parse_id(&raw_id)?;
    if db.time(repo.delete(&id)).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&repo, &raw_id))
    }
}

fn not_found(repo: &UserRepository, raw_id: &str) -> AppError {
    AppError::NotFound(format!("{} user '{raw_id}' not found", repo.scheme()))
}
