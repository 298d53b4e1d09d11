//! Time arithmetic for interview sessions.
//!
//! Balances are fractional minutes; everything shown to a client is whole seconds.
//! Billing rounds consumed time up to whole minutes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Countdown hint for a polling client. Never drives a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Low,
    Critical,
}

/// `floor(balance × 60)`, never negative.
pub fn balance_to_seconds(balance_minutes: f64) -> i64 {
    if !balance_minutes.is_finite() || balance_minutes <= 0.0 {
        return 0;
    }
    (balance_minutes * 60.0).floor() as i64
}

/// Whole seconds between `started_at` and `now`, floored. A start in the future counts as 0.
pub fn elapsed_seconds(started_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - started_at).num_seconds().max(0)
}

/// Minutes charged for a session: consumed seconds rounded up to whole minutes.
pub fn billed_minutes(duration_seconds: i64) -> i64 {
    if duration_seconds <= 0 {
        return 0;
    }
    (duration_seconds + 59) / 60
}

/// Balance after charging `minutes`, clamped at zero. `PgLedgerStore` does the
/// same in SQL with `GREATEST`; the in-memory store calls this.
#[cfg(test)]
pub fn deduct_minutes(balance_minutes: f64, minutes: i64) -> f64 {
    (balance_minutes - minutes as f64).max(0.0)
}

/// `Critical` for `0 < remaining ≤ critical_at`, `Low` for `critical_at < remaining ≤ low_at`.
pub fn warning_level(remaining_seconds: i64, critical_at: i64, low_at: i64) -> Option<WarningLevel> {
    if remaining_seconds <= 0 {
        None
    } else if remaining_seconds <= critical_at {
        Some(WarningLevel::Critical)
    } else if remaining_seconds <= low_at {
        Some(WarningLevel::Low)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_balance_to_seconds_floors() {
        assert_eq!(balance_to_seconds(5.0), 300);
        assert_eq!(balance_to_seconds(0.05), 3);
        assert_eq!(balance_to_seconds(1.999), 119);
    }

    #[test]
    fn test_balance_to_seconds_never_negative() {
        assert_eq!(balance_to_seconds(0.0), 0);
        assert_eq!(balance_to_seconds(-2.5), 0);
        assert_eq!(balance_to_seconds(f64::NAN), 0);
    }

    #[test]
    fn test_elapsed_seconds_truncates_sub_second() {
        let start = Utc::now();
        let now = start + Duration::milliseconds(185_900);
        assert_eq!(elapsed_seconds(start, now), 185);
    }

    #[test]
    fn test_elapsed_seconds_clock_skew_is_zero() {
        let start = Utc::now();
        assert_eq!(elapsed_seconds(start, start - Duration::seconds(4)), 0);
    }

    #[test]
    fn test_billed_minutes_rounds_up() {
        assert_eq!(billed_minutes(0), 0);
        assert_eq!(billed_minutes(1), 1);
        assert_eq!(billed_minutes(60), 1);
        assert_eq!(billed_minutes(61), 2);
        assert_eq!(billed_minutes(185), 4);
    }

    #[test]
    fn test_deduct_minutes_clamps_at_zero() {
        assert_eq!(deduct_minutes(5.0, 4), 1.0);
        assert_eq!(deduct_minutes(0.5, 1), 0.0);
    }

    #[test]
    fn test_warning_level_bands() {
        assert_eq!(warning_level(0, 10, 15), None);
        assert_eq!(warning_level(1, 10, 15), Some(WarningLevel::Critical));
        assert_eq!(warning_level(10, 10, 15), Some(WarningLevel::Critical));
        assert_eq!(warning_level(11, 10, 15), Some(WarningLevel::Low));
        assert_eq!(warning_level(15, 10, 15), Some(WarningLevel::Low));
        assert_eq!(warning_level(16, 10, 15), None);
        assert_eq!(warning_level(115, 10, 15), None);
    }

    #[test]
    fn test_warning_level_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&WarningLevel::Critical).unwrap(),
            "\"critical\""
        );
    }
}
