//! Webhook signature verification tests

mod common;

use std::time::Duration;

use common::*;
use subgate::payments::StripeGateway;

fn test_gateway() -> StripeGateway {
    StripeGateway::new("sk_test_xxx", WEBHOOK_SECRET, Duration::from_secs(5))
}

/// Get current Unix timestamp as a string (for webhook signature tests)
fn current_timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Get an old timestamp (for testing timestamp rejection)
fn old_timestamp() -> String {
    // 10 minutes ago - beyond the 5-minute tolerance
    (chrono::Utc::now().timestamp() - 600).to_string()
}

#[test]
fn valid_signature_accepted() {
    let gateway = test_gateway();
    let payload = b"{\"type\":\"charge.succeeded\"}";
    let timestamp = current_timestamp();
    let signature = compute_signature(payload, WEBHOOK_SECRET, &timestamp);
    let header = format!("t={},v1={}", timestamp, signature);

    let result = gateway
        .verify_webhook_signature(payload, &header)
        .expect("Verification should not error");

    assert!(result, "Valid signature should be accepted");
}

#[test]
fn wrong_secret_rejected() {
    let gateway = test_gateway();
    let payload = b"{\"type\":\"charge.succeeded\"}";
    let timestamp = current_timestamp();
    let signature = compute_signature(payload, "wrong_secret", &timestamp);
    let header = format!("t={},v1={}", timestamp, signature);

    let result = gateway
        .verify_webhook_signature(payload, &header)
        .expect("Verification should not error");

    assert!(!result, "Signature from wrong secret should be rejected");
}

#[test]
fn modified_payload_rejected() {
    let gateway = test_gateway();
    let original = b"{\"type\":\"charge.succeeded\"}";
    let modified = b"{\"type\":\"charge.succeeded\",\"hacked\":true}";
    let timestamp = current_timestamp();
    let signature = compute_signature(original, WEBHOOK_SECRET, &timestamp);
    let header = format!("t={},v1={}", timestamp, signature);

    let result = gateway
        .verify_webhook_signature(modified, &header)
        .expect("Verification should not error");

    assert!(!result, "Modified payload should be rejected");
}

#[test]
fn old_timestamp_rejected() {
    let gateway = test_gateway();
    let payload = b"{\"type\":\"charge.succeeded\"}";
    let timestamp = old_timestamp();
    // Valid signature but timestamp beyond tolerance
    let signature = compute_signature(payload, WEBHOOK_SECRET, &timestamp);
    let header = format!("t={},v1={}", timestamp, signature);

    let result = gateway
        .verify_webhook_signature(payload, &header)
        .expect("Verification should not error");

    assert!(!result, "Old timestamp should be rejected (replay prevention)");
}

#[test]
fn future_timestamp_rejected() {
    let gateway = test_gateway();
    let payload = b"{\"type\":\"charge.succeeded\"}";
    // Two minutes in the future - beyond the 60-second skew allowance
    let timestamp = (chrono::Utc::now().timestamp() + 120).to_string();
    let signature = compute_signature(payload, WEBHOOK_SECRET, &timestamp);
    let header = format!("t={},v1={}", timestamp, signature);

    let result = gateway
        .verify_webhook_signature(payload, &header)
        .expect("Verification should not error");

    assert!(!result, "Future timestamp should be rejected");
}

#[test]
fn missing_timestamp_errors() {
    let gateway = test_gateway();
    let result = gateway.verify_webhook_signature(b"{}", "v1=somesignature");
    assert!(result.is_err(), "Missing timestamp should error");
}

#[test]
fn missing_signature_errors() {
    let gateway = test_gateway();
    let result = gateway.verify_webhook_signature(b"{}", "t=1234567890");
    assert!(result.is_err(), "Missing signature should error");
}

#[test]
fn malformed_header_errors() {
    let gateway = test_gateway();
    assert!(gateway.verify_webhook_signature(b"{}", "garbage").is_err());
    assert!(gateway.verify_webhook_signature(b"{}", "").is_err());
}
