//! Shared test fixtures: a recording billing gateway, app construction
//! helpers, and webhook signing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use subgate::ledger::PendingOrderLedger;
use subgate::payments::{
    BillingGateway, GatewayError, ScheduleRequest, StripeGateway, SubscriptionProvisioner,
    SubscriptionRequest,
};
use subgate::policy::SubscriptionPolicy;
use subgate::sessions::SessionStore;
use subgate::state::AppState;
use subgate::store::{InMemoryUserStore, OfflinePaymentLog, UserRecord};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const ADMIN_SECRET: &str = "admin_test_secret";
pub const PRICE_ID: &str = "price_test_123";

/// Gateway fake that records every request instead of calling out.
#[derive(Default)]
pub struct RecordingGateway {
    pub subscriptions: Mutex<Vec<SubscriptionRequest>>,
    pub schedules: Mutex<Vec<ScheduleRequest>>,
    pub default_methods: Mutex<Vec<(String, String)>>,
    /// Internal user IDs keyed by gateway customer, for metadata lookups.
    pub app_users: Mutex<HashMap<String, i64>>,
    pub prior_subscription: AtomicBool,
    /// When set, creation calls fail once and clear the flag.
    pub fail_once: AtomicBool,
}

impl RecordingGateway {
    fn maybe_fail(&self) -> Result<(), GatewayError> {
        if self.fail_once.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Api("injected failure".into()));
        }
        Ok(())
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn schedule_count(&self) -> usize {
        self.schedules.lock().unwrap().len()
    }
}

#[async_trait]
impl BillingGateway for RecordingGateway {
    async fn create_subscription(&self, req: &SubscriptionRequest) -> Result<String, GatewayError> {
        self.maybe_fail()?;
        let mut subs = self.subscriptions.lock().unwrap();
        subs.push(req.clone());
        Ok(format!("sub_{}", subs.len()))
    }

    async fn create_schedule(&self, req: &ScheduleRequest) -> Result<String, GatewayError> {
        self.maybe_fail()?;
        let mut schedules = self.schedules.lock().unwrap();
        schedules.push(req.clone());
        Ok(format!("sched_{}", schedules.len()))
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_intent_id: &str,
    ) -> Result<(), GatewayError> {
        self.default_methods
            .lock()
            .unwrap()
            .push((customer_id.to_string(), payment_intent_id.to_string()));
        Ok(())
    }

    async fn had_prior_subscription(
        &self,
        _customer_id: &str,
        _price_id: &str,
    ) -> Result<bool, GatewayError> {
        Ok(self.prior_subscription.load(Ordering::SeqCst))
    }

    async fn customer_app_user(&self, customer_id: &str) -> Result<Option<i64>, GatewayError> {
        Ok(self.app_users.lock().unwrap().get(customer_id).copied())
    }
}

/// App state wired to the recording gateway, with two seeded users.
pub fn test_state(policy: SubscriptionPolicy) -> (AppState, Arc<RecordingGateway>) {
    let gateway = Arc::new(RecordingGateway::default());
    let users = Arc::new(InMemoryUserStore::new());
    for id in [1, 2] {
        users.insert(
            UserRecord {
                id,
                email: format!("user{}@example.com", id),
                name: format!("User {}", id),
                billing_id: None,
                active: false,
            },
            "password",
        );
    }

    let stripe = Arc::new(StripeGateway::new(
        "sk_test_xxx",
        WEBHOOK_SECRET,
        Duration::from_secs(5),
    ));
    let provisioner = Arc::new(SubscriptionProvisioner::new(
        policy,
        PRICE_ID.to_string(),
        1,
        gateway.clone(),
    ));

    let state = AppState {
        ledger: Arc::new(PendingOrderLedger::new()),
        sessions: Arc::new(SessionStore::new()),
        users,
        offline: Arc::new(OfflinePaymentLog::new()),
        stripe,
        provisioner,
        admin_secret: ADMIN_SECRET.to_string(),
        unit_months: 1,
    };
    (state, gateway)
}

pub fn compute_signature(payload: &[u8], secret: &str, timestamp: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// `stripe-signature` header value for a payload signed right now.
pub fn signature_header(payload: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = compute_signature(payload, WEBHOOK_SECRET, &timestamp);
    format!("t={},v1={}", timestamp, signature)
}
