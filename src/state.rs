//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::config::Config;
use crate::ledger::PendingOrderLedger;
use crate::payments::{StripeGateway, SubscriptionProvisioner};
use crate::sessions::SessionStore;
use crate::store::{OfflinePaymentLog, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<PendingOrderLedger>,
    pub sessions: Arc<SessionStore>,
    pub users: Arc<dyn UserStore>,
    pub offline: Arc<OfflinePaymentLog>,
    /// Concrete gateway handle; webhook signature verification is not part
    /// of the `BillingGateway` seam.
    pub stripe: Arc<StripeGateway>,
    pub provisioner: Arc<SubscriptionProvisioner>,
    pub admin_secret: String,
    pub unit_months: u32,
}

impl AppState {
    pub fn new(config: &Config, users: Arc<dyn UserStore>) -> Self {
        let stripe = Arc::new(StripeGateway::new(
            &config.gateway_secret_key,
            &config.webhook_secret,
            config.gateway_timeout,
        ));
        let provisioner = Arc::new(SubscriptionProvisioner::new(
            config.policy.clone(),
            config.price_id.clone(),
            config.unit_months,
            stripe.clone(),
        ));
        Self {
            ledger: Arc::new(PendingOrderLedger::new()),
            sessions: Arc::new(SessionStore::new()),
            users,
            offline: Arc::new(OfflinePaymentLog::new()),
            stripe,
            provisioner,
            admin_secret: config.admin_secret.clone(),
            unit_months: config.unit_months,
        }
    }
}
