use axum::{
    Json,
    extract::{Path, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, SecurityQuestionDto};
use crate::db::repositories::user::Role;
use crate::services::{LoginOutcome, SecurityAnswerInput};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub otp_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Deserialize)]
pub struct OtpVerifyRequest {
    pub username: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct SecurityAnswerPayload {
    pub question_id: i32,
    pub answer: String,
}

#[derive(Deserialize)]
pub struct CompleteSetupRequest {
    pub token: String,
    pub password: String,
    pub answers: Vec<SecurityAnswerPayload>,
}

#[derive(Serialize)]
pub struct SetupTokenStatus {
    pub valid: bool,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Middleware
// ============================================================================

/// The verified identity behind a request. Attached by `resolve_principal`;
/// absence simply means anonymous.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i32,
    pub username: String,
    pub role: Role,
}

/// Resolve `Authorization: Bearer <token>` into a principal. Never rejects;
/// routes that need authentication layer `require_auth` on top.
pub async fn resolve_principal(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = extract_bearer_token(request.headers())
        && let Some(claims) = state.tokens().verify(&token)
    {
        tracing::Span::current().record("user_id", claims.sub);
        request.extensions_mut().insert(CurrentUser {
            id: claims.sub,
            username: claims.username,
            role: claims.role,
        });
    }

    next.run(request).await
}

/// Reject anonymous requests.
pub async fn require_auth(request: Request, next: Next) -> Result<Response, ApiError> {
    if request.extensions().get::<CurrentUser>().is_none() {
        return Err(ApiError::Unauthorized("Authentication required".to_string()));
    }

    Ok(next.run(request).await)
}

/// Reject anything but an authenticated admin. The role match is exhaustive
/// so an unhandled role can never slip through.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let Some(user) = request.extensions().get::<CurrentUser>() else {
        return Err(ApiError::Unauthorized("Authentication required".to_string()));
    };

    match user.role {
        Role::Admin => Ok(next.run(request).await),
        Role::Operator => Err(ApiError::Forbidden(
            "Administrator privileges required".to_string(),
        )),
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth_header = headers.get("Authorization")?;
    let auth_str = auth_header.to_str().ok()?;
    let token = auth_str.strip_prefix("Bearer ")?;
    Some(token.trim().to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    if payload.username.is_empty() {
        return Err(ApiError::validation("Username is required"));
    }
    if payload.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let outcome = state
        .auth()
        .login(&payload.username, &payload.password)
        .await?;

    let response = match outcome {
        LoginOutcome::Session(session) => LoginResponse {
            otp_required: false,
            token: Some(session.token),
            username: Some(session.username),
            role: Some(session.role),
        },
        LoginOutcome::OtpRequired => LoginResponse {
            otp_required: true,
            token: None,
            username: None,
            role: None,
        },
    };

    Ok(Json(ApiResponse::success(response)))
}

/// POST /api/auth/otp/verify
pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OtpVerifyRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    if payload.username.is_empty() || payload.code.is_empty() {
        return Err(ApiError::validation("Username and code are required"));
    }

    let session = state
        .auth()
        .verify_otp(&payload.username, &payload.code)
        .await?;

    Ok(Json(ApiResponse::success(LoginResponse {
        otp_required: false,
        token: Some(session.token),
        username: Some(session.username),
        role: Some(session.role),
    })))
}

/// GET /api/auth/setup/{token}
///
/// Validity probe for the setup page. Deliberately reports only a boolean.
pub async fn validate_setup_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<SetupTokenStatus>>, ApiError> {
    let valid = state.auth().validate_setup_token(&token).await?;
    Ok(Json(ApiResponse::success(SetupTokenStatus { valid })))
}

/// POST /api/auth/setup
pub async fn complete_setup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CompleteSetupRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let answers = payload
        .answers
        .into_iter()
        .map(|a| SecurityAnswerInput {
            question_id: a.question_id,
            answer: a.answer,
        })
        .collect();

    state
        .auth()
        .complete_password_setup(&payload.token, &payload.password, answers)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: "Password set, you can now log in".to_string(),
    })))
}

/// GET /api/auth/questions
pub async fn security_questions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<SecurityQuestionDto>>>, ApiError> {
    let questions = state.auth().get_active_security_questions().await?;

    let dtos = questions
        .into_iter()
        .map(|q| SecurityQuestionDto {
            id: q.id,
            question: q.question,
        })
        .collect();

    Ok(Json(ApiResponse::success(dtos)))
}

/// GET /api/auth/me
pub async fn me(
    axum::Extension(user): axum::Extension<CurrentUser>,
) -> impl IntoResponse {
    #[derive(Serialize)]
    struct MeResponse {
        id: i32,
        username: String,
        role: Role,
    }

    Json(ApiResponse::success(MeResponse {
        id: user.id,
        username: user.username,
        role: user.role,
    }))
}
