use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::clients::Mailer;
use crate::config::Config;
use crate::state::SharedState;

pub mod auth;
mod error;
mod rate_limit;
mod system;
mod types;
mod users;

pub use error::ApiError;
pub use types::*;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Arc<tokio::sync::RwLock<Config>> {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }

    #[must_use]
    pub fn auth(&self) -> &Arc<dyn crate::services::AuthService> {
        &self.shared.auth_service
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<crate::services::TokenService> {
        &self.shared.token_service
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<crate::rate_limit::RateLimiter> {
        &self.shared.rate_limiter
    }
}

pub async fn create_app_state(shared: Arc<SharedState>) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
    })
}

pub async fn create_app_state_from_config(config: Config) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    Ok(create_app_state(shared).await)
}

/// Test hook: same wiring, but outbound mail goes to the supplied mailer.
pub async fn create_app_state_with_mailer(
    config: Config,
    mailer: Arc<dyn Mailer>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::with_mailer(config, mailer).await?);
    Ok(create_app_state(shared).await)
}

pub async fn router(state: Arc<AppState>) -> Router {
    let cors_origins = {
        let config = state.config().read().await;
        config.server.cors_allowed_origins.clone()
    };

    let admin_routes = Router::new()
        .route("/users", get(users::list_users).post(users::create_user))
        .route(
            "/users/{id}",
            put(users::update_user).delete(users::delete_user),
        )
        .route("/users/{id}/status", put(users::update_status))
        .route("/users/{id}/password", put(users::change_password))
        .layer(middleware::from_fn(auth::require_admin));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .merge(admin_routes)
        .layer(middleware::from_fn(auth::require_auth));

    let public_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/otp/verify", post(auth::verify_otp))
        .route("/auth/setup/{token}", get(auth::validate_setup_token))
        .route("/auth/setup", post(auth::complete_setup))
        .route("/auth/questions", get(auth::security_questions))
        .route("/system/health", get(system::health));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::resolve_principal,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_middleware,
        ));

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
