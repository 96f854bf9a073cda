//! Delay calculator: turns a step delay into an absolute due time.

use chrono::{DateTime, Utc};

use crate::types::{Delay, DelayUnit};

/// `reference + amount * unit`. Pure; the same inputs always give the same
/// timestamp. Saturates at the latest representable instant instead of
/// overflowing, so an absurd delay means "never due".
pub fn compute_due_at(reference: DateTime<Utc>, amount: u32, unit: DelayUnit) -> DateTime<Utc> {
    checked_due_at(reference, amount, unit).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `None` when the due time is past the representable range.
pub fn checked_due_at(reference: DateTime<Utc>, amount: u32, unit: DelayUnit) -> Option<DateTime<Utc>> {
    reference.checked_add_signed(unit.span(amount))
}

/// Convenience over [`compute_due_at`] for a step's [`Delay`].
pub fn due_after(reference: DateTime<Utc>, delay: &Delay) -> DateTime<Utc> {
    compute_due_at(reference, delay.amount, delay.unit)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_each_unit() {
        assert_eq!(compute_due_at(t0(), 2, DelayUnit::Hours), t0() + Duration::hours(2));
        assert_eq!(compute_due_at(t0(), 45, DelayUnit::Minutes), t0() + Duration::minutes(45));
        assert_eq!(compute_due_at(t0(), 3, DelayUnit::Days), t0() + Duration::days(3));
        assert_eq!(compute_due_at(t0(), 1, DelayUnit::Weeks), t0() + Duration::days(7));
    }

    #[test]
    fn test_zero_amount_is_reference() {
        assert_eq!(compute_due_at(t0(), 0, DelayUnit::Weeks), t0());
    }

    #[test]
    fn test_bogus_unit_behaves_as_days() {
        let bogus = DelayUnit::from("bogus-unit");
        assert_eq!(
            compute_due_at(t0(), 1, bogus),
            compute_due_at(t0(), 1, DelayUnit::Days)
        );
    }

    #[test]
    fn test_overflowing_delay_saturates() {
        assert_eq!(
            compute_due_at(t0(), u32::MAX, DelayUnit::Days),
            DateTime::<Utc>::MAX_UTC
        );
        assert_eq!(
            compute_due_at(t0(), u32::MAX, DelayUnit::Weeks),
            DateTime::<Utc>::MAX_UTC
        );
        assert!(checked_due_at(t0(), u32::MAX, DelayUnit::Days).is_none());
        assert!(checked_due_at(t0(), u32::MAX, DelayUnit::Minutes).is_some());
    }

    #[test]
    fn test_due_after_uses_step_delay() {
        assert_eq!(due_after(t0(), &Delay::days(1)), t0() + Duration::days(1));
    }
}
