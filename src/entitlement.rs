//! Cumulative entitlement expiry for manually-settled payments.
//!
//! Offline payments are recorded by an administrator and never mutated; the
//! expiry date is recomputed from the full history on every read, so there
//! is no derived state to keep consistent.

use chrono::{Months, NaiveDate};

/// A manually-reported payment: who, when, and how many billing units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflinePayment {
    pub user_id: i64,
    pub payment_date: NaiveDate,
    /// Billing units purchased, >= 1.
    pub quantity: u32,
}

/// Compute the entitlement expiry from an unordered payment history.
///
/// Payments are walked in date order. A payment dated strictly after the
/// running expiry starts a fresh window at its own date; a payment on or
/// before the running expiry stacks its full duration onto it. Each payment
/// contributes `quantity * unit_months` calendar months.
///
/// Returns `None` for an empty history or on calendar overflow.
pub fn entitlement_expiry(payments: &[OfflinePayment], unit_months: u32) -> Option<NaiveDate> {
    let mut sorted: Vec<&OfflinePayment> = payments.iter().collect();
    sorted.sort_by_key(|p| p.payment_date);

    let mut expiry: Option<NaiveDate> = None;
    for payment in sorted {
        let months = Months::new(payment.quantity.checked_mul(unit_months)?);
        expiry = Some(match expiry {
            Some(current) if payment.payment_date <= current => {
                current.checked_add_months(months)?
            }
            _ => payment.payment_date.checked_add_months(months)?,
        });
    }
    expiry
}

/// Whether the user's manually-settled entitlement is active as of `today`.
pub fn is_entitled(payments: &[OfflinePayment], unit_months: u32, today: NaiveDate) -> bool {
    entitlement_expiry(payments, unit_months).is_some_and(|expiry| today < expiry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn payment(y: i32, m: u32, d: u32, quantity: u32) -> OfflinePayment {
        OfflinePayment {
            user_id: 1,
            payment_date: date(y, m, d),
            quantity,
        }
    }

    #[test]
    fn empty_history_has_no_expiry() {
        assert_eq!(entitlement_expiry(&[], 1), None);
    }

    #[test]
    fn single_payment_counts_quantity() {
        let payments = [payment(2021, 1, 1, 2)];
        assert_eq!(entitlement_expiry(&payments, 1), Some(date(2021, 3, 1)));
    }

    #[test]
    fn payment_within_window_stacks() {
        let payments = [payment(2021, 1, 1, 1), payment(2021, 1, 15, 2)];
        assert_eq!(entitlement_expiry(&payments, 1), Some(date(2021, 4, 1)));
    }

    #[test]
    fn same_day_payments_stack() {
        let payments = [payment(2021, 1, 1, 1), payment(2021, 1, 1, 1)];
        assert_eq!(entitlement_expiry(&payments, 1), Some(date(2021, 3, 1)));
    }

    #[test]
    fn payment_after_lapse_restarts() {
        // First window lapses on 2021-02-01; the March payment counts from
        // its own date, not from the lapsed window's end.
        let payments = [payment(2021, 1, 1, 1), payment(2021, 3, 1, 1)];
        assert_eq!(entitlement_expiry(&payments, 1), Some(date(2021, 4, 1)));
    }

    #[test]
    fn order_of_input_is_irrelevant() {
        let forward = [payment(2021, 1, 1, 1), payment(2021, 1, 15, 2)];
        let backward = [payment(2021, 1, 15, 2), payment(2021, 1, 1, 1)];
        assert_eq!(
            entitlement_expiry(&forward, 1),
            entitlement_expiry(&backward, 1)
        );
    }

    #[test]
    fn payment_on_expiry_day_stacks() {
        // Boundary: a payment dated exactly on the running expiry extends it.
        let payments = [payment(2021, 1, 1, 1), payment(2021, 2, 1, 1)];
        assert_eq!(entitlement_expiry(&payments, 1), Some(date(2021, 3, 1)));
    }

    #[test]
    fn unit_months_scales_each_unit() {
        let payments = [payment(2021, 1, 1, 2)];
        assert_eq!(entitlement_expiry(&payments, 12), Some(date(2023, 1, 1)));
    }

    #[test]
    fn entitled_until_strictly_before_expiry() {
        let payments = [payment(2021, 1, 1, 1)];
        assert!(is_entitled(&payments, 1, date(2021, 1, 31)));
        assert!(!is_entitled(&payments, 1, date(2021, 2, 1)));
    }
}
