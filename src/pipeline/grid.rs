//! Canonical delivery-interval grid generation.
//!
//! Every run starts from the exact ordered sequence of delivery keys the
//! prediction must cover; sources are later joined against this sequence.

use itertools::iproduct;

use crate::domain::{DeliveryKey, DeliveryRange, MarketConvention};
use crate::error::RunError;

/// Generate the canonical ordered key sequence covering `range`.
///
/// The output has exactly `days * hours_per_day * intervals_per_hour` keys,
/// strictly ascending, no gaps, no duplicates. `max_span_days` bounds memory
/// use for unreasonable ranges.
pub fn build_grid(
    range: &DeliveryRange,
    convention: &MarketConvention,
    max_span_days: u32,
) -> Result<Vec<DeliveryKey>, RunError> {
    if range.start > range.end {
        return Err(RunError::InvalidRange(format!(
            "start {} is after end {}",
            range.start, range.end
        )));
    }
    let days = range.days();
    if days > max_span_days as i64 {
        return Err(RunError::InvalidRange(format!(
            "span of {days} days exceeds maximum of {max_span_days}"
        )));
    }

    let mut keys = Vec::with_capacity(days as usize * convention.keys_per_day());
    for (date, hour, interval) in iproduct!(
        range.dates(),
        1..=convention.hours_per_day,
        1..=convention.intervals_per_hour
    ) {
        keys.push(DeliveryKey::new(date, hour, interval));
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[rstest]
    #[case(4, 1, 96)]
    #[case(4, 3, 288)]
    #[case(12, 1, 288)]
    #[case(1, 7, 168)]
    fn test_grid_cardinality(
        #[case] intervals_per_hour: u8,
        #[case] days: u32,
        #[case] expected: usize,
    ) {
        let conv = MarketConvention {
            hours_per_day: 24,
            intervals_per_hour,
        };
        let range = DeliveryRange::new(
            date(2024, 6, 1),
            date(2024, 6, 1) + chrono::Duration::days(days as i64 - 1),
        );
        let keys = build_grid(&range, &conv, 14).unwrap();
        assert_eq!(keys.len(), expected);
    }

    #[test]
    fn test_grid_is_strictly_ordered_and_unique() {
        let conv = MarketConvention::default();
        let range = DeliveryRange::new(date(2024, 6, 1), date(2024, 6, 2));
        let keys = build_grid(&range, &conv, 14).unwrap();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(keys.first().unwrap(), &DeliveryKey::new(date(2024, 6, 1), 1, 1));
        assert_eq!(keys.last().unwrap(), &DeliveryKey::new(date(2024, 6, 2), 24, 4));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let conv = MarketConvention::default();
        let range = DeliveryRange::new(date(2024, 6, 2), date(2024, 6, 1));
        let err = build_grid(&range, &conv, 14).unwrap_err();
        assert!(matches!(err, RunError::InvalidRange(_)));
    }

    #[test]
    fn test_span_guard() {
        let conv = MarketConvention::default();
        let range = DeliveryRange::new(date(2024, 6, 1), date(2024, 6, 30));
        let err = build_grid(&range, &conv, 14).unwrap_err();
        assert!(matches!(err, RunError::InvalidRange(_)));
        // Exactly at the limit is fine.
        let range = DeliveryRange::new(date(2024, 6, 1), date(2024, 6, 14));
        assert!(build_grid(&range, &conv, 14).is_ok());
    }

    proptest! {
        #[test]
        fn prop_cardinality_and_order(
            day_offset in 0i64..20_000,
            span in 1i64..=10,
            intervals in prop::sample::select(vec![1u8, 2, 3, 4, 6, 12]),
        ) {
            let start = date(1990, 1, 1) + chrono::Duration::days(day_offset);
            let range = DeliveryRange::new(start, start + chrono::Duration::days(span - 1));
            let conv = MarketConvention { hours_per_day: 24, intervals_per_hour: intervals };
            let keys = build_grid(&range, &conv, 10).unwrap();
            prop_assert_eq!(keys.len(), (span * 24 * intervals as i64) as usize);
            prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
