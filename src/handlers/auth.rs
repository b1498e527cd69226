use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::store::UserStore;

use super::authenticate;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user_id: i64,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Issue a session token. A successful login replaces any existing session
/// for the user.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let valid = state
        .users
        .verify_credentials(req.user_id, &req.password)
        .map_err(|e| AppError::Retryable(e.to_string()))?;
    if !valid {
        return Err(AppError::Unauthorized);
    }

    let token = state.sessions.login(req.user_id);
    tracing::debug!("User {} logged in", req.user_id);
    Ok(Json(LoginResponse { token }))
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LogoutResponse>> {
    let user_id = authenticate(&state, &headers)?;
    state.sessions.logout(user_id);
    Ok(Json(LogoutResponse { logged_out: true }))
}
