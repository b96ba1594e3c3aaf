//! User handlers.
//!
//! Implements the user CRUD endpoints:
//!
//! - `POST /api/v1/users` - Create user
//! - `GET /api/v1/users` - List users (`skip`, `limit`)
//! - `GET /api/v1/users/:user_id` - Get user
//! - `PUT /api/v1/users/:user_id` - Partial update
//! - `DELETE /api/v1/users/:user_id` - Delete user
//!
//! Extractor rejections are turned into [`ApiError::BadRequest`] so every
//! client error carries the same body shape and reaches the failure
//! telemetry path.

use crate::errors::ApiError;
use crate::models::{CreateUserRequest, ListUsersQuery, UpdateUserRequest, User};
use crate::routes::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::instrument;

fn path_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|_| ApiError::BadRequest("user_id must be an integer".to_string()))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Handler for `POST /api/v1/users`.
#[instrument(skip_all, name = "user_api.users.create")]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let request = json_body(body)?;
    let user = state.users.create(&request).await?;

    tracing::info!(target: "user_api.users", user_id = user.id, "User created");

    Ok((StatusCode::CREATED, Json(user)))
}

/// Handler for `GET /api/v1/users`.
#[instrument(skip_all, name = "user_api.users.list")]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListUsersQuery>, QueryRejection>,
) -> Result<Json<Vec<User>>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    Ok(Json(state.users.list(query).await?))
}

/// Handler for `GET /api/v1/users/:user_id`.
#[instrument(skip_all, name = "user_api.users.get")]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<User>, ApiError> {
    let user_id = path_id(path)?;
    Ok(Json(state.users.get(user_id).await?))
}

/// Handler for `PUT /api/v1/users/:user_id`.
#[instrument(skip_all, name = "user_api.users.update")]
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<User>, ApiError> {
    let user_id = path_id(path)?;
    let request = json_body(body)?;
    let user = state.users.update(user_id, &request).await?;

    tracing::info!(target: "user_api.users", user_id, "User updated");

    Ok(Json(user))
}

/// Handler for `DELETE /api/v1/users/:user_id`.
#[instrument(skip_all, name = "user_api.users.delete")]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let user_id = path_id(path)?;
    state.users.delete(user_id).await?;

    tracing::info!(target: "user_api.users", user_id, "User deleted");

    Ok(StatusCode::NO_CONTENT)
}
