//! Concurrency tests for the pending-order ledger: consumption must stay
//! exactly-once under racing webhook deliveries.

use std::sync::Arc;
use std::thread;

use subgate::ledger::{PendingOrder, PendingOrderLedger, Purpose};

#[test]
fn racing_deliveries_consume_exactly_once() {
    let ledger = Arc::new(PendingOrderLedger::new());
    let order = PendingOrder::new(1, Purpose::InitialPayment, None, None);
    let token = order.order_token.clone();
    ledger.put(order).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = ledger.clone();
            let token = token.clone();
            thread::spawn(move || {
                ledger
                    .take_if_match(&token, 1, Purpose::InitialPayment)
                    .unwrap()
                    .is_some()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1, "exactly one delivery may consume the order");
    assert!(ledger.is_empty());
}

#[test]
fn concurrent_puts_and_takes_balance_out() {
    let ledger = Arc::new(PendingOrderLedger::new());

    // Writers record distinct orders; readers consume them as they appear.
    let mut tokens = Vec::new();
    for i in 0..64 {
        let order = PendingOrder::new(i, Purpose::ExtraPayment, None, Some(1));
        tokens.push((order.order_token.clone(), i));
        ledger.put(order).unwrap();
    }

    let handles: Vec<_> = tokens
        .into_iter()
        .map(|(token, customer)| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                ledger
                    .take_if_match(&token, customer, Purpose::ExtraPayment)
                    .unwrap()
                    .is_some()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert!(ledger.is_empty());
}

#[test]
fn restore_makes_order_consumable_again() {
    let ledger = PendingOrderLedger::new();
    let order = PendingOrder::new(1, Purpose::InitialPayment, None, None);
    let token = order.order_token.clone();
    ledger.put(order).unwrap();

    let taken = ledger
        .take_if_match(&token, 1, Purpose::InitialPayment)
        .unwrap()
        .unwrap();
    assert!(ledger.is_empty());

    ledger.restore(taken);
    assert_eq!(ledger.len(), 1);
    assert!(ledger
        .take_if_match(&token, 1, Purpose::InitialPayment)
        .unwrap()
        .is_some());
}
