use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entitlement::{entitlement_expiry, OfflinePayment};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::store::UserStore;

use super::require_admin;

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub user_id: i64,
    /// ISO date (`YYYY-MM-DD`) the payment was settled.
    pub payment_date: NaiveDate,
    /// Billing units purchased.
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub user_id: i64,
    pub entitled: bool,
    /// First day the entitlement no longer covers, if any payment exists.
    pub expires: Option<NaiveDate>,
}

/// Record a manually-settled payment (bank transfer, cash) and recompute
/// the user's entitlement.
pub async fn record_offline_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RecordPaymentRequest>,
) -> Result<Json<EntitlementResponse>> {
    require_admin(&state, &headers)?;

    if req.quantity == 0 {
        return Err(AppError::BadRequest("quantity must be at least 1".into()));
    }
    state
        .users
        .get(req.user_id)
        .map_err(|e| AppError::Retryable(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("user {}", req.user_id)))?;

    state.offline.record(OfflinePayment {
        user_id: req.user_id,
        payment_date: req.payment_date,
        quantity: req.quantity,
    });

    let response = entitlement_of(&state, req.user_id)?;
    state
        .users
        .set_active(req.user_id, response.entitled)
        .map_err(|e| AppError::Retryable(e.to_string()))?;

    tracing::info!(
        "Recorded offline payment for user {} ({} units on {}), entitled until {:?}",
        req.user_id,
        req.quantity,
        req.payment_date,
        response.expires
    );

    Ok(Json(response))
}

/// Current entitlement derived from the user's offline payment history.
pub async fn offline_entitlement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<i64>,
) -> Result<Json<EntitlementResponse>> {
    require_admin(&state, &headers)?;

    state
        .users
        .get(user_id)
        .map_err(|e| AppError::Retryable(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;

    Ok(Json(entitlement_of(&state, user_id)?))
}

fn entitlement_of(state: &AppState, user_id: i64) -> Result<EntitlementResponse> {
    let payments = state.offline.for_user(user_id);
    let expires = entitlement_expiry(&payments, state.unit_months);
    let entitled = expires.is_some_and(|e| Utc::now().date_naive() < e);
    Ok(EntitlementResponse {
        user_id,
        entitled,
        expires,
    })
}
