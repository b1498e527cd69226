pub mod gateway;
pub mod provisioner;
pub mod stripe;

pub use gateway::{
    BillingGateway, EndBehavior, GatewayError, SchedulePhase, ScheduleRequest, SubscriptionRequest,
};
pub use provisioner::{ProvisionPlan, SubscriptionProvisioner};
pub use stripe::{
    ChargeObject, EventData, InvoiceObject, StripeGateway, SubscriptionObject, WebhookEnvelope,
};
