//! Payment processor webhook endpoint.
//!
//! Deliveries are unordered, at-least-once, and unauthenticated beyond the
//! signature header, so every branch here is defensive: verify first, then
//! correlate against the pending-order ledger, and only acknowledge with
//! 200 once local state reflects the event. A non-2xx answer makes the
//! processor redeliver, which is the retry loop for transient failures.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;

use crate::ledger::{ExtraKind, LedgerError, Purpose};
use crate::payments::{
    BillingGateway, ChargeObject, InvoiceObject, SubscriptionObject, WebhookEnvelope,
};
use crate::state::AppState;
use crate::store::UserStore;

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

/// Webhook payloads are small; anything larger is garbage or abuse.
const WEBHOOK_BODY_LIMIT: usize = 64 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/stripe", post(handle_stripe_webhook))
        .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT))
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResult {
    let signature = match headers.get("stripe-signature").and_then(|v| v.to_str().ok()) {
        Some(s) => s,
        None => return (StatusCode::BAD_REQUEST, "Missing stripe-signature header"),
    };

    match state.stripe.verify_webhook_signature(&body, signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::UNAUTHORIZED, "Invalid signature"),
        Err(e) => {
            tracing::error!("Signature verification error: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Signature verification failed",
            );
        }
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse webhook: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    match envelope.event_type.as_str() {
        "charge.succeeded" => handle_charge_succeeded(&state, &envelope).await,
        "invoice.payment_succeeded" => handle_invoice_paid(&state, &envelope).await,
        "customer.subscription.deleted" => handle_subscription_deleted(&state, &envelope).await,
        other => {
            tracing::debug!("Ignoring webhook event type {}", other);
            (StatusCode::OK, "Ignored")
        }
    }
}

/// A confirmed charge. Only charges carrying our correlation metadata are
/// ours; everything else is acknowledged untouched.
async fn handle_charge_succeeded(state: &AppState, envelope: &WebhookEnvelope) -> WebhookResult {
    let charge: ChargeObject = match serde_json::from_value(envelope.data.object.clone()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to parse charge: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid charge");
        }
    };

    let token = match charge.metadata.get("order_token") {
        Some(t) => t.clone(),
        None => return (StatusCode::OK, "No order token"),
    };

    // A charge that names one of our order tokens must carry the rest of
    // the correlation keys; anything else is a tampered or corrupt event.
    let user_id: i64 = match charge.metadata.get("user_id").and_then(|v| v.parse().ok()) {
        Some(id) => id,
        None => {
            tracing::error!("INTEGRITY VIOLATION: charge {} has order token but no user_id", charge.id);
            return (StatusCode::BAD_REQUEST, "Malformed metadata");
        }
    };
    let purpose = match charge.metadata.get("purpose").and_then(|v| Purpose::from_str(v)) {
        Some(p) => p,
        None => {
            tracing::error!("INTEGRITY VIOLATION: charge {} has order token but no valid purpose", charge.id);
            return (StatusCode::BAD_REQUEST, "Malformed metadata");
        }
    };

    let order = match state.ledger.take_if_match(&token, user_id, purpose) {
        Ok(Some(order)) => order,
        Ok(None) => {
            tracing::debug!("Order {} already handled, acking duplicate delivery", token);
            return (StatusCode::OK, "Already handled");
        }
        Err(LedgerError::IntegrityViolation { token, detail }) => {
            tracing::error!("INTEGRITY VIOLATION: order {}: {}", token, detail);
            return (StatusCode::BAD_REQUEST, "Order mismatch");
        }
        Err(e) => {
            tracing::error!("Ledger error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Ledger error");
        }
    };

    // The settlement method promised at checkout must match the one the
    // event reports.
    if order.purpose == Purpose::ExtraPayment {
        let event_kind = charge
            .metadata
            .get("extra_kind")
            .and_then(|v| ExtraKind::from_str(v));
        if event_kind != order.extra_kind {
            tracing::error!(
                "INTEGRITY VIOLATION: order {}: extra kind mismatch (event {:?}, order {:?})",
                order.order_token,
                event_kind,
                order.extra_kind
            );
            state.ledger.restore(order);
            return (StatusCode::BAD_REQUEST, "Order mismatch");
        }
    }

    let customer = match charge.customer.as_deref() {
        Some(c) => c,
        None => {
            tracing::error!(
                "INTEGRITY VIOLATION: charge {} for order {} has no customer",
                charge.id,
                order.order_token
            );
            state.ledger.restore(order);
            return (StatusCode::BAD_REQUEST, "Charge missing customer");
        }
    };

    // Flags first, provisioning last: both setters are idempotent, so a
    // restored order replays them harmlessly, while re-provisioning after a
    // partial failure would double-book the customer.
    if let Err(e) = state
        .users
        .set_billing_id(user_id, customer)
        .and_then(|_| state.users.set_active(user_id, true))
    {
        tracing::warn!("User store failure for order {}: {}", order.order_token, e);
        state.ledger.restore(order);
        return (StatusCode::BAD_GATEWAY, "User store unavailable");
    }

    let provisioned = match order.purpose {
        Purpose::InitialPayment => {
            state
                .provisioner
                .provision_initial(&order, customer, charge.payment_intent.as_deref())
                .await
        }
        Purpose::InitialPaymentTodayStart => {
            state
                .provisioner
                .provision_initial_today(&order, customer, charge.payment_intent.as_deref())
                .await
        }
        Purpose::ExtraPayment => state.provisioner.provision_extra(&order, customer).await,
    };

    if let Err(e) = provisioned {
        tracing::warn!(
            "Gateway failure provisioning order {}: {}, restoring for redelivery",
            order.order_token,
            e
        );
        state.ledger.restore(order);
        return (StatusCode::BAD_GATEWAY, "Gateway failure");
    }

    tracing::info!(
        "Order {} provisioned for user {} ({})",
        order.order_token,
        user_id,
        order.purpose.as_str()
    );
    (StatusCode::OK, "Processed")
}

/// Renewal succeeded: keep (or re-grant) the entitlement.
async fn handle_invoice_paid(state: &AppState, envelope: &WebhookEnvelope) -> WebhookResult {
    let invoice: InvoiceObject = match serde_json::from_value(envelope.data.object.clone()) {
        Ok(i) => i,
        Err(e) => {
            tracing::error!("Failed to parse invoice: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid invoice");
        }
    };

    let customer = match invoice.customer.as_deref() {
        Some(c) => c,
        None => return (StatusCode::OK, "No customer on invoice"),
    };

    match resolve_user(state, customer).await {
        Ok(Some(user_id)) => match state.users.set_active(user_id, true) {
            Ok(()) => (StatusCode::OK, "Renewed"),
            Err(e) => {
                tracing::warn!("User store failure on renewal: {}", e);
                (StatusCode::BAD_GATEWAY, "User store unavailable")
            }
        },
        Ok(None) => {
            tracing::warn!("Invoice {} for unknown customer {}", invoice.id, customer);
            (StatusCode::OK, "Unknown customer")
        }
        Err(result) => result,
    }
}

/// Subscription gone at the gateway: revoke the entitlement.
async fn handle_subscription_deleted(
    state: &AppState,
    envelope: &WebhookEnvelope,
) -> WebhookResult {
    let subscription: SubscriptionObject = match serde_json::from_value(envelope.data.object.clone())
    {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to parse subscription: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid subscription");
        }
    };

    let customer = match subscription.customer.as_deref() {
        Some(c) => c,
        None => return (StatusCode::OK, "No customer on subscription"),
    };

    match resolve_user(state, customer).await {
        Ok(Some(user_id)) => match state.users.set_active(user_id, false) {
            Ok(()) => {
                tracing::info!(
                    "Subscription {} deleted, entitlement revoked for user {}",
                    subscription.id,
                    user_id
                );
                (StatusCode::OK, "Revoked")
            }
            Err(e) => {
                tracing::warn!("User store failure on revocation: {}", e);
                (StatusCode::BAD_GATEWAY, "User store unavailable")
            }
        },
        Ok(None) => {
            tracing::warn!(
                "Subscription {} for unknown customer {}",
                subscription.id,
                customer
            );
            (StatusCode::OK, "Unknown customer")
        }
        Err(result) => result,
    }
}

/// Map a gateway customer to an internal user: local billing-id mapping
/// first, then the customer metadata recorded at checkout construction.
async fn resolve_user(
    state: &AppState,
    customer: &str,
) -> std::result::Result<Option<i64>, WebhookResult> {
    match state.users.find_by_billing_id(customer) {
        Ok(Some(user)) => return Ok(Some(user.id)),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("User store failure resolving customer: {}", e);
            return Err((StatusCode::BAD_GATEWAY, "User store unavailable"));
        }
    }

    match state.provisioner.gateway().customer_app_user(customer).await {
        Ok(Some(user_id)) => {
            if let Err(e) = state.users.set_billing_id(user_id, customer) {
                tracing::warn!("Failed to record billing id for user {}: {}", user_id, e);
            }
            Ok(Some(user_id))
        }
        Ok(None) => Ok(None),
        Err(e) => {
            tracing::warn!("Gateway failure resolving customer {}: {}", customer, e);
            Err((StatusCode::BAD_GATEWAY, "Gateway failure"))
        }
    }
}
