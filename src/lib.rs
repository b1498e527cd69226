//! Subgate - subscription billing backend around an asynchronous
//! payment-to-entitlement reconciliation core.
//!
//! Checkout intents are recorded in a pending-order ledger, confirmed by
//! payment processor webhooks, and turned into gateway subscriptions or
//! schedules according to the configured policy.

pub mod config;
pub mod entitlement;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod payments;
pub mod policy;
pub mod sessions;
pub mod state;
pub mod store;
