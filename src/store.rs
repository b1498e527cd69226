//! User-store collaborator and the offline-payment history.
//!
//! The reconciliation core only ever asks the user store simple questions
//! and flips simple flags, so the seam is a small trait. The in-memory
//! implementation backs tests and single-process deployments; a persistent
//! backend would implement the same trait.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::entitlement::OfflinePayment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub name: String,
    /// Customer identity at the external payment gateway, recorded when the
    /// first confirmed payment arrives.
    pub billing_id: Option<String>,
    /// Whether the user currently holds an active entitlement.
    pub active: bool,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("user {0} not found")]
    UserNotFound(i64),

    /// Backend failure; webhook handlers surface this as retryable.
    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

/// External user-store collaborator. Setters are idempotent: flipping a
/// flag to its current value is a no-op, and webhook redelivery may call
/// them more than once.
pub trait UserStore: Send + Sync {
    fn get(&self, user_id: i64) -> Result<Option<UserRecord>, StoreError>;

    fn find_by_billing_id(&self, billing_id: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Exact-match credential check for the login endpoint.
    fn verify_credentials(&self, user_id: i64, password: &str) -> Result<bool, StoreError>;

    fn set_active(&self, user_id: i64, active: bool) -> Result<(), StoreError>;

    fn set_billing_id(&self, user_id: i64, billing_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct StoredUser {
    record: UserRecord,
    password: String,
}

/// Single-process user store guarded by one RwLock.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<i64, StoredUser>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: UserRecord, password: &str) {
        let mut users = self.users.write().expect("user store lock poisoned");
        users.insert(
            record.id,
            StoredUser {
                record,
                password: password.to_string(),
            },
        );
    }
}

impl UserStore for InMemoryUserStore {
    fn get(&self, user_id: i64) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().expect("user store lock poisoned");
        Ok(users.get(&user_id).map(|u| u.record.clone()))
    }

    fn find_by_billing_id(&self, billing_id: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().expect("user store lock poisoned");
        Ok(users
            .values()
            .find(|u| u.record.billing_id.as_deref() == Some(billing_id))
            .map(|u| u.record.clone()))
    }

    fn verify_credentials(&self, user_id: i64, password: &str) -> Result<bool, StoreError> {
        let users = self.users.read().expect("user store lock poisoned");
        Ok(users.get(&user_id).is_some_and(|u| {
            u.password.len() == password.len()
                && bool::from(u.password.as_bytes().ct_eq(password.as_bytes()))
        }))
    }

    fn set_active(&self, user_id: i64, active: bool) -> Result<(), StoreError> {
        let mut users = self.users.write().expect("user store lock poisoned");
        let user = users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.record.active = active;
        Ok(())
    }

    fn set_billing_id(&self, user_id: i64, billing_id: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().expect("user store lock poisoned");
        let user = users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.record.billing_id = Some(billing_id.to_string());
        Ok(())
    }
}

/// Append-only per-user history of manually-settled payments. Written by
/// the administrative endpoint, read by the entitlement calculator.
#[derive(Debug, Default)]
pub struct OfflinePaymentLog {
    payments: Mutex<HashMap<i64, Vec<OfflinePayment>>>,
}

impl OfflinePaymentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, payment: OfflinePayment) {
        let mut payments = self.payments.lock().expect("offline log lock poisoned");
        payments.entry(payment.user_id).or_default().push(payment);
    }

    pub fn for_user(&self, user_id: i64) -> Vec<OfflinePayment> {
        let payments = self.payments.lock().expect("offline log lock poisoned");
        payments.get(&user_id).cloned().unwrap_or_default()
    }

    /// Users with any offline payment are settled manually and must not go
    /// through the gateway checkout flows.
    pub fn has_any(&self, user_id: i64) -> bool {
        let payments = self.payments.lock().expect("offline log lock poisoned");
        payments.get(&user_id).is_some_and(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn user(id: i64) -> UserRecord {
        UserRecord {
            id,
            email: format!("u{}@example.com", id),
            name: format!("User {}", id),
            billing_id: None,
            active: false,
        }
    }

    #[test]
    fn setters_are_idempotent() {
        let store = InMemoryUserStore::new();
        store.insert(user(1), "pw");

        store.set_active(1, true).unwrap();
        store.set_active(1, true).unwrap();
        store.set_billing_id(1, "cus_123").unwrap();
        store.set_billing_id(1, "cus_123").unwrap();

        let got = store.get(1).unwrap().unwrap();
        assert!(got.active);
        assert_eq!(got.billing_id.as_deref(), Some("cus_123"));
    }

    #[test]
    fn lookup_by_billing_id() {
        let store = InMemoryUserStore::new();
        store.insert(user(1), "pw");
        store.insert(user(2), "pw");
        store.set_billing_id(2, "cus_abc").unwrap();

        assert_eq!(store.find_by_billing_id("cus_abc").unwrap().unwrap().id, 2);
        assert!(store.find_by_billing_id("cus_zzz").unwrap().is_none());
    }

    #[test]
    fn credentials_exact_match() {
        let store = InMemoryUserStore::new();
        store.insert(user(1), "hunter2");
        assert!(store.verify_credentials(1, "hunter2").unwrap());
        assert!(!store.verify_credentials(1, "hunter3").unwrap());
        assert!(!store.verify_credentials(9, "hunter2").unwrap());
    }

    #[test]
    fn offline_log_accumulates() {
        let log = OfflinePaymentLog::new();
        assert!(!log.has_any(1));
        log.record(OfflinePayment {
            user_id: 1,
            payment_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            quantity: 1,
        });
        assert!(log.has_any(1));
        assert_eq!(log.for_user(1).len(), 1);
        assert!(log.for_user(2).is_empty());
    }
}
