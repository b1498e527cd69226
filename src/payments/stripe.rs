use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::gateway::{
    BillingGateway, GatewayError, ScheduleRequest, SubscriptionRequest,
};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";

/// Metadata key carrying the internal user ID on gateway customers.
const APP_USER_KEY: &str = "app_user_id";

#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: String,
    webhook_secret: String,
}

impl StripeGateway {
    pub fn new(secret_key: &str, webhook_secret: &str, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            secret_key: secret_key.to_string(),
            webhook_secret: webhook_secret.to_string(),
        }
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Verify a `t=timestamp,v1=signature` header against the raw body.
    ///
    /// Side-effect free: callers reject the request on `Ok(false)` or
    /// `Err(_)` without touching any state.
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<bool, GatewayError> {
        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in signature.split(',') {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| GatewayError::Decode("invalid signature format".into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| GatewayError::Decode("invalid signature format".into()))?;

        // Reject replayed-but-stale requests.
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| GatewayError::Decode("invalid timestamp in signature".into()))?;

        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        // Clock skew tolerance for timestamps from the future: 60 seconds.
        if age < -60 {
            tracing::warn!("Webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| GatewayError::Decode("invalid webhook secret".into()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison; the length is not secret (always 64 hex
        // chars for SHA-256).
        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();
        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<serde_json::Value, GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("{}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, GatewayError> {
        let response = self
            .client
            .get(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api(format!("{}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

fn object_id(value: &serde_json::Value) -> Result<String, GatewayError> {
    value
        .get("id")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| GatewayError::Decode("response missing id".into()))
}

#[async_trait]
impl BillingGateway for StripeGateway {
    async fn create_subscription(&self, req: &SubscriptionRequest) -> Result<String, GatewayError> {
        let mut form = vec![
            ("customer".to_string(), req.customer_id.clone()),
            ("items[0][price]".to_string(), req.price_id.clone()),
            ("items[0][quantity]".to_string(), req.quantity.to_string()),
        ];
        if let Some(anchor) = req.billing_cycle_anchor {
            form.push(("billing_cycle_anchor".to_string(), anchor.to_string()));
        }

        let created = self.post_form("/subscriptions", &form).await?;
        object_id(&created)
    }

    async fn create_schedule(&self, req: &ScheduleRequest) -> Result<String, GatewayError> {
        let mut form = vec![
            ("customer".to_string(), req.customer_id.clone()),
            ("start_date".to_string(), req.start_date.to_string()),
            ("end_behavior".to_string(), req.end_behavior.as_str().to_string()),
        ];
        for (i, phase) in req.phases.iter().enumerate() {
            form.push((
                format!("phases[{}][items][0][price]", i),
                phase.price_id.clone(),
            ));
            form.push((
                format!("phases[{}][items][0][quantity]", i),
                phase.quantity.to_string(),
            ));
            if let Some(trial_end) = phase.trial_end {
                form.push((format!("phases[{}][trial_end]", i), trial_end.to_string()));
            }
            if let Some(end_date) = phase.end_date {
                form.push((format!("phases[{}][end_date]", i), end_date.to_string()));
            }
            if let Some(ref coupon) = phase.coupon {
                form.push((
                    format!("phases[{}][discounts][0][coupon]", i),
                    coupon.clone(),
                ));
            }
        }

        let created = self.post_form("/subscription_schedules", &form).await?;
        object_id(&created)
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_intent_id: &str,
    ) -> Result<(), GatewayError> {
        let intent = self
            .get_json(&format!("/payment_intents/{}", payment_intent_id))
            .await?;
        let payment_method = intent
            .get("payment_method")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                GatewayError::Decode("payment intent has no payment method".into())
            })?;

        self.post_form(
            &format!("/customers/{}", customer_id),
            &[(
                "invoice_settings[default_payment_method]".to_string(),
                payment_method.to_string(),
            )],
        )
        .await?;
        Ok(())
    }

    async fn had_prior_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
    ) -> Result<bool, GatewayError> {
        let listed = self
            .get_json(&format!(
                "/subscriptions?customer={}&price={}&status=all&limit=1",
                customer_id, price_id
            ))
            .await?;
        Ok(listed
            .get("data")
            .and_then(|v| v.as_array())
            .is_some_and(|data| !data.is_empty()))
    }

    async fn customer_app_user(&self, customer_id: &str) -> Result<Option<i64>, GatewayError> {
        let customer = self.get_json(&format!("/customers/{}", customer_id)).await?;
        Ok(customer
            .get("metadata")
            .and_then(|m| m.get(APP_USER_KEY))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok()))
    }
}

// ============ Webhook event envelope ============

/// Generic webhook event - the object is parsed per event type.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// `charge.succeeded` payload. The metadata map carries the correlation
/// keys chosen at order creation.
#[derive(Debug, Deserialize)]
pub struct ChargeObject {
    pub id: String,
    pub customer: Option<String>,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// `invoice.payment_succeeded` payload.
#[derive(Debug, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: Option<String>,
}

/// `customer.subscription.deleted` payload.
#[derive(Debug, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: Option<String>,
}
