use std::env;
use std::time::Duration;

use crate::policy::{AnchorDate, SeasonWindow, SubscriptionPolicy};

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Secret key for the payment gateway REST API.
    pub gateway_secret_key: String,
    /// Shared secret used to verify webhook signatures.
    pub webhook_secret: String,
    /// Gateway price identifier for the subscription product.
    pub price_id: String,
    /// Shared secret gating the administrative offline-payment endpoints.
    pub admin_secret: String,
    pub policy: SubscriptionPolicy,
    /// Months of entitlement granted per purchased billing unit.
    pub unit_months: u32,
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub gateway_timeout: Duration,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("SUBGATE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let session_ttl_days: u64 = env::var("SESSION_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(7);
        let sweep_secs: u64 = env::var("SESSION_SWEEP_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600);
        let gateway_timeout_secs: u64 = env::var("GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Self {
            host,
            port,
            gateway_secret_key: require("GATEWAY_SECRET_KEY"),
            webhook_secret: require("WEBHOOK_SECRET"),
            price_id: require("SUBSCRIPTION_PRICE_ID"),
            admin_secret: require("ADMIN_SECRET"),
            policy: policy_from_env(),
            unit_months: env::var("UNIT_MONTHS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(12),
            session_ttl: Duration::from_secs(session_ttl_days * 24 * 3600),
            sweep_interval: Duration::from_secs(sweep_secs),
            gateway_timeout: Duration::from_secs(gateway_timeout_secs),
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn require(key: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => {
            // Missing required configuration is unrecoverable at startup.
            panic!("Missing env variable: {}", key);
        }
    }
}

/// Build the typed policy from `SUBSCRIPTION_POLICY` and its companion
/// variables. Anchor dates use the `DD/MM` format.
fn policy_from_env() -> SubscriptionPolicy {
    let name = env::var("SUBSCRIPTION_POLICY").unwrap_or_else(|_| "normal".to_string());

    match name.as_str() {
        "normal" => SubscriptionPolicy::Normal,
        "fixed_anchor" => SubscriptionPolicy::FixedAnchor {
            anchor: require_anchor("ANCHOR_DATE"),
        },
        "fixed_anchor_no_trial" => SubscriptionPolicy::FixedAnchorNoTrial {
            anchor: require_anchor("ANCHOR_DATE"),
            trial_months: env::var("TRIAL_MONTHS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(12),
        },
        "seasonal_window" => SubscriptionPolicy::SeasonalWindow {
            anchor: require_anchor("ANCHOR_DATE"),
            window: SeasonWindow {
                open: require_anchor("SEASON_OPEN"),
                close: require_anchor("SEASON_CLOSE"),
            },
            // Absence silently disables the returning-customer discount.
            loyalty_coupon: env::var("LOYALTY_COUPON_ID").ok().filter(|v| !v.is_empty()),
        },
        other => panic!("Unknown SUBSCRIPTION_POLICY: {}", other),
    }
}

fn require_anchor(key: &str) -> AnchorDate {
    match AnchorDate::parse(&require(key)) {
        Some(anchor) => anchor,
        None => panic!("Invalid date in {}: expected DD/MM", key),
    }
}
