use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::rate_limit::{Decision, EndpointClass};

/// Per-request rate limiting, applied before authentication so credential
/// stuffing is throttled whether or not the guesses are valid.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let class = classify(request.method(), request.uri().path());
    let client = client_id(request.headers(), request.extensions());

    match state.limiter().check(&client, class) {
        Decision::Allowed => next.run(request).await,
        Decision::Limited { retry_after } => {
            tracing::warn!(
                "Rate limited {client} on {} {}",
                request.method(),
                request.uri().path()
            );
            ApiError::RateLimited {
                retry_after_seconds: retry_after.as_secs().max(1),
            }
            .into_response()
        }
    }
}

/// Credential endpoints get the strict limit; reads are generous; everything
/// else counts as an admin mutation.
fn classify(method: &Method, path: &str) -> EndpointClass {
    if path.starts_with("/api/auth/login")
        || path.starts_with("/api/auth/otp")
        || path.starts_with("/api/auth/setup")
    {
        EndpointClass::Login
    } else if method == Method::GET {
        EndpointClass::PublicRead
    } else {
        EndpointClass::AdminMutation
    }
}

/// Client identity for rate-limit keys: forwarded-for first, then real-ip,
/// then the socket peer.
fn client_id(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first) = value.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
    {
        let value = value.trim();
        if !value.is_empty() {
            return value.to_string();
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "local".to_string(), |info| info.0.ip().to_string())
}
