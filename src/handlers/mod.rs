pub mod auth;
pub mod checkout;
pub mod offline;
pub mod webhooks;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Pull a bearer token out of the Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized)
}

/// Authenticate a request from `x-user-id` plus the bearer session token.
/// Returns the authenticated user ID.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<i64> {
    let user_id: i64 = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(AppError::Unauthorized)?;
    let token = extract_bearer_token(headers)?;
    if !state.sessions.validate(user_id, token) {
        return Err(AppError::Unauthorized);
    }
    Ok(user_id)
}

/// Require the administrative shared secret in `x-admin-secret`.
pub fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<()> {
    use subtle::ConstantTimeEq;
    let provided = headers
        .get("x-admin-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    let ok = provided.len() == state.admin_secret.len()
        && bool::from(
            provided
                .as_bytes()
                .ct_eq(state.admin_secret.as_bytes()),
        );
    if !ok {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/orders", post(checkout::create_order))
        .route(
            "/admin/offline-payments",
            post(offline::record_offline_payment),
        )
        .route(
            "/admin/offline-payments/:user_id/expiry",
            get(offline::offline_entitlement),
        )
}
