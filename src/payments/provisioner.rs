//! Builds and submits the gateway request(s) a confirmed payment entitles
//! the customer to, according to the active subscription policy.
//!
//! Provisioning is only ever invoked with an order freshly consumed from
//! the ledger, so each order token provisions at most once. Gateway
//! failures are retryable: the webhook router restores the order and lets
//! the processor redeliver.

use std::sync::Arc;

use chrono::{DateTime, Months, Utc};

use crate::ledger::PendingOrder;
use crate::policy::SubscriptionPolicy;

use super::gateway::{
    BillingGateway, EndBehavior, GatewayError, SchedulePhase, ScheduleRequest, SubscriptionRequest,
};

/// The gateway calls a confirmed payment resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionPlan {
    Subscription(SubscriptionRequest),
    Schedules(Vec<ScheduleRequest>),
}

pub struct SubscriptionProvisioner {
    policy: SubscriptionPolicy,
    price_id: String,
    unit_months: u32,
    gateway: Arc<dyn BillingGateway>,
}

impl SubscriptionProvisioner {
    pub fn new(
        policy: SubscriptionPolicy,
        price_id: String,
        unit_months: u32,
        gateway: Arc<dyn BillingGateway>,
    ) -> Self {
        Self {
            policy,
            price_id,
            unit_months,
            gateway,
        }
    }

    pub fn policy(&self) -> &SubscriptionPolicy {
        &self.policy
    }

    pub fn gateway(&self) -> &Arc<dyn BillingGateway> {
        &self.gateway
    }

    fn subscription_now(&self, customer: &str) -> ProvisionPlan {
        ProvisionPlan::Subscription(SubscriptionRequest {
            customer_id: customer.to_string(),
            price_id: self.price_id.clone(),
            quantity: 1,
            billing_cycle_anchor: None,
        })
    }

    /// Decide the gateway request(s) for an initial payment. Pure calendar
    /// logic; `had_prior_subscription` is resolved by the caller because it
    /// needs a gateway round-trip.
    pub fn plan_initial(
        &self,
        customer: &str,
        now: DateTime<Utc>,
        had_prior_subscription: bool,
    ) -> ProvisionPlan {
        let today = now.date_naive();
        match &self.policy {
            SubscriptionPolicy::Normal => self.subscription_now(customer),

            SubscriptionPolicy::FixedAnchor { anchor } => {
                ProvisionPlan::Subscription(SubscriptionRequest {
                    customer_id: customer.to_string(),
                    price_id: self.price_id.clone(),
                    quantity: 1,
                    billing_cycle_anchor: Some(anchor.next_occurrence_unix(now)),
                })
            }

            SubscriptionPolicy::FixedAnchorNoTrial {
                anchor,
                trial_months,
            } => {
                // The upfront charge paid for the first interval: the
                // schedule starts at the anchor with a trial covering it.
                let start = anchor.next_occurrence_unix(now);
                ProvisionPlan::Schedules(vec![ScheduleRequest {
                    customer_id: customer.to_string(),
                    start_date: start,
                    phases: vec![SchedulePhase {
                        price_id: self.price_id.clone(),
                        quantity: 1,
                        trial_end: add_months_unix(start, *trial_months),
                        end_date: None,
                        coupon: None,
                    }],
                    end_behavior: EndBehavior::Release,
                }])
            }

            SubscriptionPolicy::SeasonalWindow {
                anchor,
                window,
                loyalty_coupon,
            } => {
                if window.contains(today) {
                    return self.subscription_now(customer);
                }
                // Outside the window: the upfront payment buys the stretch
                // until the next anchor (phase 1, then cancel), and a second
                // schedule takes over at the anchor and runs indefinitely.
                let anchor_unix = anchor.next_occurrence_unix(now);
                let coupon = if had_prior_subscription {
                    loyalty_coupon.clone()
                } else {
                    None
                };
                ProvisionPlan::Schedules(vec![
                    ScheduleRequest {
                        customer_id: customer.to_string(),
                        start_date: now.timestamp(),
                        phases: vec![SchedulePhase {
                            price_id: self.price_id.clone(),
                            quantity: 1,
                            trial_end: Some(anchor_unix),
                            end_date: Some(anchor_unix),
                            coupon: None,
                        }],
                        end_behavior: EndBehavior::Cancel,
                    },
                    ScheduleRequest {
                        customer_id: customer.to_string(),
                        start_date: anchor_unix,
                        phases: vec![SchedulePhase {
                            price_id: self.price_id.clone(),
                            quantity: 1,
                            trial_end: None,
                            end_date: None,
                            coupon,
                        }],
                        end_behavior: EndBehavior::Release,
                    },
                ])
            }
        }
    }

    /// Decide the extender schedule for a manually-settled extra payment of
    /// `quantity` billing units.
    pub fn plan_extra(
        &self,
        customer: &str,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> ScheduleRequest {
        let today = now.date_naive();
        let quantity = quantity.max(1);

        // Paid-through end and schedule start per policy. Anchored policies
        // extend from the next anchor; the immediate policy from now. The
        // seasonal variant consumes one unit on the stretch to the anchor
        // whenever the window is closed or this year's anchor has passed.
        let (start, units) = match &self.policy {
            SubscriptionPolicy::Normal => (now.timestamp(), quantity),
            SubscriptionPolicy::FixedAnchor { anchor } => {
                (anchor.next_occurrence_unix(now), quantity)
            }
            SubscriptionPolicy::FixedAnchorNoTrial { anchor, .. } => {
                (anchor.next_occurrence_unix(now), quantity)
            }
            SubscriptionPolicy::SeasonalWindow { anchor, window, .. } => {
                let units = if !window.contains(today) || anchor.passed_this_year(today) {
                    quantity - 1
                } else {
                    quantity
                };
                (anchor.next_occurrence_unix(now), units)
            }
        };

        // Quantity is bounded at order creation, but the math stays checked
        // so a corrupt order can never wrap the paid-through date.
        let end = units
            .checked_mul(self.unit_months)
            .and_then(|months| add_months_unix(start, months));

        // Start from now except for anchored-start policies: the covered
        // interval is entirely a trial, and the schedule cancels at its end.
        let schedule_start = match &self.policy {
            SubscriptionPolicy::FixedAnchor { .. }
            | SubscriptionPolicy::FixedAnchorNoTrial { .. } => start,
            _ => now.timestamp(),
        };

        ScheduleRequest {
            customer_id: customer.to_string(),
            start_date: schedule_start,
            phases: vec![SchedulePhase {
                price_id: self.price_id.clone(),
                quantity,
                trial_end: end,
                end_date: end,
                coupon: None,
            }],
            end_behavior: EndBehavior::Cancel,
        }
    }

    /// Provision a confirmed initial payment: pin the charged payment
    /// method as the customer default, then submit the policy's plan.
    pub async fn provision_initial(
        &self,
        order: &PendingOrder,
        billing_customer_id: &str,
        payment_intent: Option<&str>,
    ) -> Result<(), GatewayError> {
        if let Some(intent) = payment_intent {
            self.gateway
                .set_default_payment_method(billing_customer_id, intent)
                .await?;
        }

        let had_prior = match &self.policy {
            SubscriptionPolicy::SeasonalWindow {
                window,
                loyalty_coupon: Some(_),
                ..
            } if !window.contains(Utc::now().date_naive()) => {
                self.gateway
                    .had_prior_subscription(billing_customer_id, &self.price_id)
                    .await?
            }
            _ => false,
        };

        let plan = self.plan_initial(billing_customer_id, Utc::now(), had_prior);
        self.submit(order, plan).await
    }

    /// Provision an initial payment whose checkout asked for an immediate
    /// start, bypassing the policy's anchor.
    pub async fn provision_initial_today(
        &self,
        order: &PendingOrder,
        billing_customer_id: &str,
        payment_intent: Option<&str>,
    ) -> Result<(), GatewayError> {
        if let Some(intent) = payment_intent {
            self.gateway
                .set_default_payment_method(billing_customer_id, intent)
                .await?;
        }
        let plan = self.subscription_now(billing_customer_id);
        self.submit(order, plan).await
    }

    /// Provision a manually-settled extra payment.
    pub async fn provision_extra(
        &self,
        order: &PendingOrder,
        billing_customer_id: &str,
    ) -> Result<(), GatewayError> {
        let quantity = order.quantity.unwrap_or(1);
        let request = self.plan_extra(billing_customer_id, quantity, Utc::now());
        self.submit(order, ProvisionPlan::Schedules(vec![request])).await
    }

    async fn submit(&self, order: &PendingOrder, plan: ProvisionPlan) -> Result<(), GatewayError> {
        match plan {
            ProvisionPlan::Subscription(request) => {
                let id = self.gateway.create_subscription(&request).await?;
                tracing::info!(
                    "Provisioned subscription {} for order {} (policy {})",
                    id,
                    order.order_token,
                    self.policy.name()
                );
            }
            ProvisionPlan::Schedules(requests) => {
                for request in &requests {
                    let id = self.gateway.create_schedule(request).await?;
                    tracing::info!(
                        "Provisioned schedule {} for order {} (policy {})",
                        id,
                        order.order_token,
                        self.policy.name()
                    );
                }
            }
        }
        Ok(())
    }
}

/// `start + months` on the calendar, as a Unix timestamp. `None` only on
/// calendar overflow.
fn add_months_unix(start: i64, months: u32) -> Option<i64> {
    DateTime::<Utc>::from_timestamp(start, 0)
        .and_then(|dt| dt.checked_add_months(Months::new(months)))
        .map(|dt| dt.timestamp())
}
