use std::collections::HashMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::ledger::{ExtraKind, PendingOrder, Purpose};
use crate::state::AppState;
use crate::store::UserStore;

use super::authenticate;

/// Upper bound on billing units in one extra-payment order. Keeps the
/// schedule math within sane calendar range.
const MAX_EXTRA_UNITS: u32 = 120;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Checkout flow tag, echoed back later in the confirmation event.
    pub purpose: String,
    pub extra_kind: Option<String>,
    /// Billing units for extra payments. Ignored for initial payments.
    pub quantity: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    pub order_token: String,
    /// Key/value pairs the caller must attach to the gateway checkout as
    /// metadata, so the confirmation webhook can be correlated back.
    pub checkout_metadata: HashMap<String, String>,
}

/// Record a pending order before redirecting the user to external checkout.
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<CreateOrderResponse>> {
    let user_id = authenticate(&state, &headers)?;

    let user = state
        .users
        .get(user_id)
        .map_err(|e| AppError::Retryable(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;

    // Manually-settled users never go through gateway checkout.
    if state.offline.has_any(user_id) {
        return Err(AppError::Conflict(
            "account is settled manually, gateway checkout unavailable".into(),
        ));
    }

    let purpose = Purpose::from_str(&req.purpose)
        .ok_or_else(|| AppError::BadRequest(format!("unknown purpose: {}", req.purpose)))?;

    let (extra_kind, quantity) = match purpose {
        Purpose::InitialPayment | Purpose::InitialPaymentTodayStart => {
            if user.active {
                return Err(AppError::Conflict("subscription already active".into()));
            }
            (None, None)
        }
        Purpose::ExtraPayment => {
            let kind = req
                .extra_kind
                .as_deref()
                .and_then(ExtraKind::from_str)
                .ok_or_else(|| {
                    AppError::BadRequest("extra payments require extra_kind (mbway/multibanco)".into())
                })?;
            let quantity = req.quantity.unwrap_or(1);
            if quantity == 0 {
                return Err(AppError::BadRequest("quantity must be at least 1".into()));
            }
            if quantity > MAX_EXTRA_UNITS {
                return Err(AppError::BadRequest(format!(
                    "quantity must be at most {}",
                    MAX_EXTRA_UNITS
                )));
            }
            (Some(kind), Some(quantity))
        }
    };

    let order = PendingOrder::new(user_id, purpose, extra_kind, quantity);
    let token = order.order_token.clone();

    let mut checkout_metadata = HashMap::from([
        ("order_token".to_string(), token.clone()),
        ("user_id".to_string(), user_id.to_string()),
        ("purpose".to_string(), purpose.as_str().to_string()),
    ]);
    if let Some(kind) = extra_kind {
        checkout_metadata.insert("extra_kind".to_string(), kind.as_str().to_string());
    }

    state
        .ledger
        .put(order)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(
        "Recorded pending order {} (user {}, purpose {})",
        token,
        user_id,
        purpose.as_str()
    );

    Ok(Json(CreateOrderResponse {
        order_token: token,
        checkout_metadata,
    }))
}
