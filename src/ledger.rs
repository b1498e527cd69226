//! In-memory ledger of outstanding checkout intents.
//!
//! An order is recorded the instant a user is redirected to the external
//! checkout page and consumed at most once, when the matching confirmation
//! event arrives. Webhook deliveries are unordered and may be duplicated,
//! so consumption is an atomic validate-and-delete: a missing token means
//! "already handled" and is a no-op for the caller, while a token whose
//! stored record contradicts the event is an integrity violation and is
//! deliberately left in place.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Which checkout flow created a pending order. Confirmation events carry
/// the same tag and must agree with the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Upfront payment for a subscription that starts at the anchor.
    InitialPayment,
    /// Upfront payment for a subscription that starts immediately.
    InitialPaymentTodayStart,
    /// Manually-settled extra payment (MB WAY / Multibanco).
    ExtraPayment,
}

impl Purpose {
    /// Wire tag embedded in checkout metadata and echoed back by the
    /// payment processor.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialPayment => "initial_payment",
            Self::InitialPaymentTodayStart => "initial_payment_today_start",
            Self::ExtraPayment => "extra_payment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initial_payment" => Some(Self::InitialPayment),
            "initial_payment_today_start" => Some(Self::InitialPaymentTodayStart),
            "extra_payment" => Some(Self::ExtraPayment),
            _ => None,
        }
    }
}

/// Settlement method for extra payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraKind {
    MbWay,
    Multibanco,
}

impl ExtraKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MbWay => "mbway",
            Self::Multibanco => "multibanco",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "mbway" => Some(Self::MbWay),
            "multibanco" => Some(Self::Multibanco),
            _ => None,
        }
    }
}

/// A recorded intent to pay, awaiting asynchronous confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrder {
    pub order_token: String,
    pub customer_id: i64,
    pub purpose: Purpose,
    pub extra_kind: Option<ExtraKind>,
    /// Billing units purchased in an extra-payment order.
    pub quantity: Option<u32>,
    /// Diagnostics only; correctness never depends on it.
    pub created_at: DateTime<Utc>,
}

impl PendingOrder {
    /// Mint a new order with a fresh UUID token.
    pub fn new(
        customer_id: i64,
        purpose: Purpose,
        extra_kind: Option<ExtraKind>,
        quantity: Option<u32>,
    ) -> Self {
        Self {
            order_token: Uuid::new_v4().to_string(),
            customer_id,
            purpose,
            extra_kind,
            quantity,
            created_at: Utc::now(),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    /// Token collision. Statistically impossible with UUID v4 tokens, so
    /// this is a fatal integrity error rather than a retryable one.
    #[error("duplicate order token: {0}")]
    DuplicateToken(String),

    /// Token found but the stored record contradicts the confirmation
    /// event. The entry is preserved for investigation.
    #[error("order {token}: {detail}")]
    IntegrityViolation { token: String, detail: String },
}

/// Concurrent store of pending orders keyed by order token. A single mutex
/// guards the map; every operation is atomic with respect to concurrent
/// webhook deliveries and order creation.
#[derive(Debug, Default)]
pub struct PendingOrderLedger {
    orders: Mutex<HashMap<String, PendingOrder>>,
}

impl PendingOrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new pending order. Fails on token collision.
    pub fn put(&self, order: PendingOrder) -> Result<(), LedgerError> {
        let mut orders = self.orders.lock().expect("ledger mutex poisoned");
        if orders.contains_key(&order.order_token) {
            return Err(LedgerError::DuplicateToken(order.order_token));
        }
        orders.insert(order.order_token.clone(), order);
        Ok(())
    }

    /// Atomically look up, validate, and consume an order.
    ///
    /// - `Ok(Some(order))` - matched; the entry is removed and must be
    ///   provisioned exactly once.
    /// - `Ok(None)` - token absent; duplicate delivery, a safe no-op.
    /// - `Err(IntegrityViolation)` - present but the customer or purpose
    ///   disagrees; the entry is NOT removed.
    pub fn take_if_match(
        &self,
        token: &str,
        expected_customer_id: i64,
        expected_purpose: Purpose,
    ) -> Result<Option<PendingOrder>, LedgerError> {
        let mut orders = self.orders.lock().expect("ledger mutex poisoned");
        let Some(order) = orders.get(token) else {
            return Ok(None);
        };
        if order.customer_id != expected_customer_id {
            return Err(LedgerError::IntegrityViolation {
                token: token.to_string(),
                detail: format!(
                    "customer mismatch: event says {}, order says {}",
                    expected_customer_id, order.customer_id
                ),
            });
        }
        if order.purpose != expected_purpose {
            return Err(LedgerError::IntegrityViolation {
                token: token.to_string(),
                detail: format!(
                    "purpose mismatch: event says {}, order says {}",
                    expected_purpose.as_str(),
                    order.purpose.as_str()
                ),
            });
        }
        Ok(orders.remove(token))
    }

    /// Put a taken order back, after a retryable downstream failure, so the
    /// processor's redelivery finds it again. Unlike `put` this overwrites:
    /// the token was ours to begin with.
    pub fn restore(&self, order: PendingOrder) {
        let mut orders = self.orders.lock().expect("ledger mutex poisoned");
        orders.insert(order.order_token.clone(), order);
    }

    pub fn len(&self) -> usize {
        self.orders.lock().expect("ledger mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_rejects_duplicate_token() {
        let ledger = PendingOrderLedger::new();
        let order = PendingOrder::new(1, Purpose::InitialPayment, None, None);
        let dup = order.clone();
        ledger.put(order).unwrap();
        assert!(matches!(
            ledger.put(dup),
            Err(LedgerError::DuplicateToken(_))
        ));
    }

    #[test]
    fn take_consumes_exactly_once() {
        let ledger = PendingOrderLedger::new();
        let order = PendingOrder::new(7, Purpose::ExtraPayment, Some(ExtraKind::Multibanco), Some(2));
        let token = order.order_token.clone();
        ledger.put(order).unwrap();

        let first = ledger.take_if_match(&token, 7, Purpose::ExtraPayment).unwrap();
        assert!(first.is_some());
        let second = ledger.take_if_match(&token, 7, Purpose::ExtraPayment).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn mismatch_preserves_entry() {
        let ledger = PendingOrderLedger::new();
        let order = PendingOrder::new(7, Purpose::InitialPayment, None, None);
        let token = order.order_token.clone();
        ledger.put(order).unwrap();

        assert!(ledger.take_if_match(&token, 8, Purpose::InitialPayment).is_err());
        assert!(ledger
            .take_if_match(&token, 7, Purpose::ExtraPayment)
            .is_err());
        assert_eq!(ledger.len(), 1);

        // A well-formed event still succeeds afterwards.
        assert!(ledger
            .take_if_match(&token, 7, Purpose::InitialPayment)
            .unwrap()
            .is_some());
    }
}
