//! Subscription policy variants and the calendar math behind them.
//!
//! The policy is chosen once at startup and handed to the provisioner and
//! the checkout endpoints at construction time. Nothing reads it from
//! ambient global state.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};

/// A recurring (month, day) calendar anchor, e.g. "every year on 01/09".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorDate {
    pub month: u32,
    pub day: u32,
}

impl AnchorDate {
    pub fn new(month: u32, day: u32) -> Option<Self> {
        // Feb 29 is allowed; non-leap years fall through to Mar 1.
        let max_day = match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 => 29,
            _ => return None,
        };
        if (1..=max_day).contains(&day) {
            Some(Self { month, day })
        } else {
            None
        }
    }

    /// Parse the original `DD/MM` configuration format.
    pub fn parse(s: &str) -> Option<Self> {
        let (day, month) = s.split_once('/')?;
        Self::new(month.trim().parse().ok()?, day.trim().parse().ok()?)
    }

    fn on_year(&self, year: i32) -> NaiveDate {
        // Feb 29 in a non-leap year lands on Mar 1.
        NaiveDate::from_ymd_opt(year, self.month, self.day)
            .or_else(|| NaiveDate::from_ymd_opt(year, self.month + 1, 1))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Next occurrence of this (month, day) on or after `today`. When today
    /// *is* the anchor, this year's occurrence wins.
    pub fn next_occurrence(&self, today: NaiveDate) -> NaiveDate {
        let this_year = self.on_year(today.year());
        if today > this_year {
            self.on_year(today.year() + 1)
        } else {
            this_year
        }
    }

    /// Midnight UTC of the next occurrence, as a Unix timestamp. This is the
    /// value the gateway accepts for billing-cycle anchors and schedule
    /// start dates.
    pub fn next_occurrence_unix(&self, now: DateTime<Utc>) -> i64 {
        self.next_occurrence(now.date_naive())
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp()
    }

    /// Whether this year's occurrence is already strictly in the past.
    pub fn passed_this_year(&self, today: NaiveDate) -> bool {
        today > self.on_year(today.year())
    }
}

/// A recurring calendar range (within one year) during which checkout
/// behaves like the immediate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonWindow {
    pub open: AnchorDate,
    pub close: AnchorDate,
}

impl SeasonWindow {
    /// True when `today` falls inside the window, inclusive on both ends.
    pub fn contains(&self, today: NaiveDate) -> bool {
        let open = self.open.on_year(today.year());
        let close = self.close.on_year(today.year());
        today >= open && today <= close
    }
}

/// Process-wide checkout/provisioning variant, set once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionPolicy {
    /// Provisioning starts immediately, no anchor.
    Normal,
    /// Subscription billed on a recurring yearly anchor; the billing-cycle
    /// anchor is the next occurrence of the configured date.
    FixedAnchor { anchor: AnchorDate },
    /// One upfront payment now; a schedule starts at the next anchor with a
    /// trial ending `trial_months` months after it.
    FixedAnchorNoTrial { anchor: AnchorDate, trial_months: u32 },
    /// Inside the open window this behaves like `Normal`; outside it, an
    /// upfront payment buys two chained phases (now -> anchor, then anchor
    /// onward, optionally discounted for returning customers).
    SeasonalWindow {
        anchor: AnchorDate,
        window: SeasonWindow,
        loyalty_coupon: Option<String>,
    },
}

impl SubscriptionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::FixedAnchor { .. } => "fixed_anchor",
            Self::FixedAnchorNoTrial { .. } => "fixed_anchor_no_trial",
            Self::SeasonalWindow { .. } => "seasonal_window",
        }
    }

    /// The anchor, for variants that carry one.
    pub fn anchor(&self) -> Option<AnchorDate> {
        match self {
            Self::Normal => None,
            Self::FixedAnchor { anchor }
            | Self::FixedAnchorNoTrial { anchor, .. }
            | Self::SeasonalWindow { anchor, .. } => Some(*anchor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn anchor_before_today_rolls_to_next_year() {
        let anchor = AnchorDate::new(3, 15).unwrap();
        assert_eq!(anchor.next_occurrence(date(2024, 6, 1)), date(2025, 3, 15));
    }

    #[test]
    fn anchor_after_today_stays_this_year() {
        let anchor = AnchorDate::new(9, 1).unwrap();
        assert_eq!(anchor.next_occurrence(date(2024, 6, 1)), date(2024, 9, 1));
    }

    #[test]
    fn anchor_tie_uses_this_year() {
        let anchor = AnchorDate::new(9, 1).unwrap();
        assert_eq!(anchor.next_occurrence(date(2024, 9, 1)), date(2024, 9, 1));
    }

    #[test]
    fn parse_is_day_slash_month() {
        let anchor = AnchorDate::parse("01/09").unwrap();
        assert_eq!(anchor.day, 1);
        assert_eq!(anchor.month, 9);
        assert!(AnchorDate::parse("32/01").is_none());
        assert!(AnchorDate::parse("01/13").is_none());
        assert!(AnchorDate::parse("junk").is_none());
    }

    #[test]
    fn impossible_month_day_pairs_are_rejected() {
        assert!(AnchorDate::new(4, 31).is_none());
        assert!(AnchorDate::new(2, 30).is_none());
        assert!(AnchorDate::parse("31/04").is_none());
        assert!(AnchorDate::parse("30/02").is_none());
        // Leap-day anchor stays valid.
        assert!(AnchorDate::new(2, 29).is_some());
    }

    #[test]
    fn window_is_inclusive() {
        let window = SeasonWindow {
            open: AnchorDate::new(6, 1).unwrap(),
            close: AnchorDate::new(8, 31).unwrap(),
        };
        assert!(window.contains(date(2024, 6, 1)));
        assert!(window.contains(date(2024, 7, 15)));
        assert!(window.contains(date(2024, 8, 31)));
        assert!(!window.contains(date(2024, 5, 31)));
        assert!(!window.contains(date(2024, 9, 1)));
    }
}
