//! Seam between provisioning logic and the payment gateway's REST surface.
//!
//! Webhook handlers and the provisioner talk to `dyn BillingGateway`, so the
//! policy variants can be exercised in tests with a recording fake instead
//! of network calls.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Transport failure (timeout, connection refused). Retryable.
    #[error("gateway request failed: {0}")]
    Request(String),

    /// The gateway answered with an error status. Retryable - the webhook
    /// redelivery is the retry loop.
    #[error("gateway returned error: {0}")]
    Api(String),

    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

/// What happens when the last schedule phase ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndBehavior {
    /// The subscription is cancelled outright.
    Cancel,
    /// The subscription keeps running on the last phase's terms.
    Release,
}

impl EndBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancel => "cancel",
            Self::Release => "release",
        }
    }
}

/// An immediately-starting (or anchor-billed) subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub customer_id: String,
    pub price_id: String,
    pub quantity: u32,
    /// Unix timestamp the billing cycle snaps to, when the policy carries
    /// an anchor.
    pub billing_cycle_anchor: Option<i64>,
}

/// One phase of a subscription schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePhase {
    pub price_id: String,
    pub quantity: u32,
    /// Nothing is billed before this moment; the upfront charge already
    /// paid for the interval.
    pub trial_end: Option<i64>,
    /// When the phase hands over to the next one (or to `end_behavior`).
    pub end_date: Option<i64>,
    pub coupon: Option<String>,
}

/// A chained-phase subscription schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub customer_id: String,
    pub start_date: i64,
    pub phases: Vec<SchedulePhase>,
    pub end_behavior: EndBehavior,
}

/// External payment gateway operations the reconciliation core needs.
#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Create a subscription; returns the gateway's subscription ID.
    async fn create_subscription(&self, req: &SubscriptionRequest) -> Result<String, GatewayError>;

    /// Create a subscription schedule; returns the gateway's schedule ID.
    async fn create_schedule(&self, req: &ScheduleRequest) -> Result<String, GatewayError>;

    /// Pin the payment method behind a confirmed payment as the customer's
    /// default, so scheduled phases can bill off-session.
    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_intent_id: &str,
    ) -> Result<(), GatewayError>;

    /// Whether the customer ever held a subscription on the given price.
    /// Drives the returning-customer loyalty discount.
    async fn had_prior_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
    ) -> Result<bool, GatewayError>;

    /// Resolve a gateway customer back to the internal user ID recorded in
    /// its metadata at checkout-construction time.
    async fn customer_app_user(&self, customer_id: &str) -> Result<Option<i64>, GatewayError>;
}
