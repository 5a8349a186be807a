use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::CurrentUser;
use super::{ApiError, ApiResponse, AppState, UserDto};
use crate::db::repositories::user::Role;
use crate::services::{CreateUserRequest, UpdateUserRequest};

#[derive(Deserialize)]
pub struct CreateUserPayload {
    pub username: String,
    pub email: String,
    pub role: String,
}

#[derive(Deserialize)]
pub struct UpdateUserPayload {
    pub username: String,
    pub email: String,
    pub role: String,
}

#[derive(Deserialize)]
pub struct UpdateStatusPayload {
    pub active: bool,
}

#[derive(Deserialize)]
pub struct ChangePasswordPayload {
    pub new_password: String,
}

fn parse_role(value: &str) -> Result<Role, ApiError> {
    Role::parse(value).ok_or_else(|| {
        ApiError::validation(format!(
            "Unknown role '{value}' (expected 'admin' or 'operator')"
        ))
    })
}

/// GET /api/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<UserDto>>>, ApiError> {
    let users = state.auth().list_users().await?;
    Ok(Json(ApiResponse::success(
        users.into_iter().map(UserDto::from).collect(),
    )))
}

/// POST /api/users
///
/// Creates an inactive account and mails the password-setup link.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateUserPayload>,
) -> Result<Json<ApiResponse<UserDto>>, ApiError> {
    let role = parse_role(&payload.role)?;

    let user = state
        .auth()
        .create_user(CreateUserRequest {
            username: payload.username,
            email: payload.email,
            role,
        })
        .await?;

    Ok(Json(ApiResponse::success(UserDto::from(user))))
}

/// PUT /api/users/{id}
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateUserPayload>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let role = parse_role(&payload.role)?;

    state
        .auth()
        .update_user(
            id,
            UpdateUserRequest {
                username: payload.username,
                email: payload.email,
                role,
            },
        )
        .await?;

    Ok(Json(ApiResponse::success(())))
}

/// DELETE /api/users/{id}
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.auth().delete_user(id, &actor.username).await?;
    Ok(Json(ApiResponse::success(())))
}

/// PUT /api/users/{id}/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateStatusPayload>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.auth().update_user_status(id, payload.active).await?;
    Ok(Json(ApiResponse::success(())))
}

/// PUT /api/users/{id}/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(payload): Json<ChangePasswordPayload>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state
        .auth()
        .change_password(id, &payload.new_password)
        .await?;

    Ok(Json(ApiResponse::success(())))
}
