use std::sync::{Arc, Mutex};

use almoner::api::AppState;
use almoner::clients::{Mailer, MailerError};
use almoner::config::Config;
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Bootstrap credentials seeded by the initial migration.
const ADMIN_USER: &str = "admin";
const ADMIN_PASSWORD: &str = "password";

const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

#[derive(Debug, Clone)]
struct SentMail {
    template: String,
    to: String,
    secret: String,
}

/// Captures outbound mail so tests can read OTP codes and setup tokens.
#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl CapturingMailer {
    fn last_secret(&self, template: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.template == template)
            .map(|m| m.secret.clone())
    }
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send_otp_email(
        &self,
        to: &str,
        _username: &str,
        code: &str,
    ) -> Result<(), MailerError> {
        self.sent.lock().unwrap().push(SentMail {
            template: "otp".to_string(),
            to: to.to_string(),
            secret: code.to_string(),
        });
        Ok(())
    }

    async fn send_password_setup_email(
        &self,
        to: &str,
        _username: &str,
        token: &str,
    ) -> Result<(), MailerError> {
        self.sent.lock().unwrap().push(SentMail {
            template: "password_setup".to_string(),
            to: to.to_string(),
            secret: token.to_string(),
        });
        Ok(())
    }

    async fn send_notification(&self, _to: &str, _subject: &str, _body: &str) {}
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.database.url = "sqlite::memory:".to_string();
    config.security.session_secret = TEST_SECRET.to_string();
    config
}

async fn spawn_app(config: Config) -> (Router, Arc<AppState>, Arc<CapturingMailer>) {
    let mailer = Arc::new(CapturingMailer::default());
    let state = almoner::api::create_app_state_with_mailer(config, mailer.clone())
        .await
        .expect("Failed to create app state");
    let app = almoner::api::router(state.clone()).await;
    (app, state, mailer)
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn login(app: &Router, username: &str, password: &str) -> (StatusCode, serde_json::Value) {
    post_json(
        app,
        "/api/auth/login",
        serde_json::json!({"username": username, "password": password}),
    )
    .await
}

#[tokio::test]
async fn login_returns_token_with_matching_identity() {
    let (app, _state, _mailer) = spawn_app(test_config()).await;

    let (status, body) = login(&app, ADMIN_USER, ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["otp_required"], false);

    let token = body["data"]["token"].as_str().expect("token expected");

    // The token resolves to the admin principal.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let me: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(me["data"]["username"], ADMIN_USER);
    assert_eq!(me["data"]["role"], "admin");
}

#[tokio::test]
async fn username_lookup_is_case_insensitive() {
    let (app, _state, _mailer) = spawn_app(test_config()).await;

    let (status, _) = login(&app, "ADMIN", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_and_unknown_user_are_indistinguishable() {
    let (app, _state, _mailer) = spawn_app(test_config()).await;

    let (status_a, body_a) = login(&app, ADMIN_USER, "wrongpass").await;
    let (status_b, body_b) = login(&app, "nobody", "wrongpass").await;

    assert_eq!(status_a, StatusCode::UNAUTHORIZED);
    assert_eq!(status_b, StatusCode::UNAUTHORIZED);
    assert_eq!(body_a["error"], body_b["error"]);
    assert_eq!(body_a["error"], "Invalid username or password");
}

#[tokio::test]
async fn anonymous_and_garbage_tokens_are_rejected() {
    let (app, _state, _mailer) = spawn_app(test_config()).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/users").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/users")
                .header("Authorization", "Bearer not.a.token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_endpoint_rate_limits_after_window_fills() {
    let mut config = test_config();
    config.rate_limit.login_limit = 5;
    config.rate_limit.window_seconds = 60;
    let (app, _state, _mailer) = spawn_app(config).await;

    for _ in 0..5 {
        let (status, _) = login(&app, ADMIN_USER, "wrongpass").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Sixth attempt inside the window is limited, not an auth failure.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    serde_json::json!({"username": ADMIN_USER, "password": "wrongpass"})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = response
        .headers()
        .get("Retry-After")
        .expect("Retry-After header expected")
        .to_str()
        .unwrap()
        .parse::<u64>()
        .unwrap();
    assert!(retry_after >= 1);
    assert!(retry_after <= 60);
}

#[tokio::test]
async fn rate_limit_keys_are_per_client() {
    let mut config = test_config();
    config.rate_limit.login_limit = 2;
    let (app, _state, _mailer) = spawn_app(config).await;

    for _ in 0..2 {
        login(&app, ADMIN_USER, "wrongpass").await;
    }
    let (status, _) = login(&app, ADMIN_USER, "wrongpass").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // A different forwarded client is unaffected.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header("Content-Type", "application/json")
                .header("X-Forwarded-For", "203.0.113.50")
                .body(Body::from(
                    serde_json::json!({"username": ADMIN_USER, "password": ADMIN_PASSWORD})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn otp_flow_requires_mailed_code() {
    let mut config = test_config();
    config.otp.enabled = true;
    let (app, _state, mailer) = spawn_app(config).await;

    let (status, body) = login(&app, ADMIN_USER, ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["otp_required"], true);
    assert!(body["data"]["token"].is_null());

    let code = mailer.last_secret("otp").expect("OTP mail expected");
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));

    // A wrong code fails but keeps the challenge alive.
    let (status, body) = post_json(
        &app,
        "/api/auth/otp/verify",
        serde_json::json!({"username": ADMIN_USER, "code": "000000"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid verification code");

    // The mailed code completes the login.
    let (status, body) = post_json(
        &app,
        "/api/auth/otp/verify",
        serde_json::json!({"username": ADMIN_USER, "code": code}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["token"].is_string());

    // The challenge is burned: replaying the same code fails.
    let (status, body) = post_json(
        &app,
        "/api/auth/otp/verify",
        serde_json::json!({"username": ADMIN_USER, "code": code}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "No valid verification code, please log in again");
}

#[tokio::test]
async fn otp_attempts_exhaust_then_challenge_disappears() {
    let mut config = test_config();
    config.otp.enabled = true;
    config.otp.max_attempts = 2;
    let (app, _state, _mailer) = spawn_app(config).await;

    let (status, body) = login(&app, ADMIN_USER, ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["otp_required"], true);

    let (_, body) = post_json(
        &app,
        "/api/auth/otp/verify",
        serde_json::json!({"username": ADMIN_USER, "code": "000000"}),
    )
    .await;
    assert_eq!(body["error"], "Invalid verification code");

    let (_, body) = post_json(
        &app,
        "/api/auth/otp/verify",
        serde_json::json!({"username": ADMIN_USER, "code": "000000"}),
    )
    .await;
    assert_eq!(body["error"], "Too many invalid attempts, please log in again");

    // The challenge was deleted, so the next attempt reports no valid code.
    let (_, body) = post_json(
        &app,
        "/api/auth/otp/verify",
        serde_json::json!({"username": ADMIN_USER, "code": "000000"}),
    )
    .await;
    assert_eq!(body["error"], "No valid verification code, please log in again");
}

#[tokio::test]
async fn fresh_login_replaces_pending_challenge() {
    let mut config = test_config();
    config.otp.enabled = true;
    let (app, _state, mailer) = spawn_app(config).await;

    login(&app, ADMIN_USER, ADMIN_PASSWORD).await;
    let first_code = mailer.last_secret("otp").unwrap();

    login(&app, ADMIN_USER, ADMIN_PASSWORD).await;
    let second_code = mailer.last_secret("otp").unwrap();

    // The first code is dead once a new challenge is issued.
    if first_code != second_code {
        let (status, _) = post_json(
            &app,
            "/api/auth/otp/verify",
            serde_json::json!({"username": ADMIN_USER, "code": first_code}),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _) = post_json(
        &app,
        "/api/auth/otp/verify",
        serde_json::json!({"username": ADMIN_USER, "code": second_code}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn expired_otp_challenge_counts_as_missing() {
    use almoner::entities::otp_challenges;
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};

    let mut config = test_config();
    config.otp.enabled = true;
    let (app, state, mailer) = spawn_app(config).await;

    let (status, body) = login(&app, ADMIN_USER, ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["otp_required"], true);
    let code = mailer.last_secret("otp").expect("OTP mail expected");

    // Backdate the pending challenge past its lifetime.
    let challenge = otp_challenges::Entity::find()
        .filter(otp_challenges::Column::Used.eq(false))
        .one(&state.store().conn)
        .await
        .unwrap()
        .unwrap();
    let mut active: otp_challenges::ActiveModel = challenge.into();
    active.expires_at = Set((chrono::Utc::now() - chrono::Duration::minutes(1)).to_rfc3339());
    sea_orm::ActiveModelTrait::update(active, &state.store().conn)
        .await
        .unwrap();

    // The correct code no longer helps; the user must log in again.
    let (status, body) = post_json(
        &app,
        "/api/auth/otp/verify",
        serde_json::json!({"username": ADMIN_USER, "code": code}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "No valid verification code, please log in again");
}

#[tokio::test]
async fn otp_attempt_counter_holds_under_concurrent_guesses() {
    let (_app, state, _mailer) = spawn_app(test_config()).await;

    let store = state.store().clone();
    let expires_at = (chrono::Utc::now() + chrono::Duration::minutes(5)).to_rfc3339();
    let challenge = store.create_otp(1, "unguessable", &expires_at).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let id = challenge.id;
        handles.push(tokio::spawn(async move {
            store.increment_otp_attempts(id).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Every bump lands; none may be lost to interleaving.
    let refreshed = store.latest_unused_otp(1).await.unwrap().unwrap();
    assert_eq!(refreshed.attempts, 8);
}

#[tokio::test]
async fn legacy_hash_is_migrated_on_login() {
    use almoner::entities::users;
    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
    use sha2::{Digest, Sha256};

    let (app, state, _mailer) = spawn_app(test_config()).await;

    // Rewrite the admin's hash into the legacy format directly in the store.
    let legacy_hash = {
        let digest = Sha256::digest(ADMIN_PASSWORD.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect::<String>()
    };

    let admin = users::Entity::find()
        .filter(users::Column::Username.eq(ADMIN_USER))
        .one(&state.store().conn)
        .await
        .unwrap()
        .unwrap();
    let mut active: users::ActiveModel = admin.into();
    active.password_hash = Set(legacy_hash.clone());
    sea_orm::ActiveModelTrait::update(active, &state.store().conn)
        .await
        .unwrap();

    // First login verifies against the legacy digest and upgrades it.
    let (status, _) = login(&app, ADMIN_USER, ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);

    let migrated = users::Entity::find()
        .filter(users::Column::Username.eq(ADMIN_USER))
        .one(&state.store().conn)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(migrated.password_hash, legacy_hash);
    assert!(migrated.password_hash.starts_with("$argon2"));

    // Second login still succeeds against the upgraded hash.
    let (status, _) = login(&app, ADMIN_USER, ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_endpoint_reports_database() {
    let (app, _state, _mailer) = spawn_app(test_config()).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/system/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["database"], true);
}
