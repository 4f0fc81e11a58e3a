//! Delivery-time keys and the market interval convention.
//!
//! Electricity markets settle on (date, hour-ending, interval) tuples rather
//! than plain timestamps. All alignment in the pipeline happens on these keys.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// How a market slices the operating day into delivery intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConvention {
    /// Operating hours per day, hour-ending numbering (1..=hours_per_day).
    pub hours_per_day: u8,
    /// Settlement intervals within each hour.
    pub intervals_per_hour: u8,
}

impl Default for MarketConvention {
    fn default() -> Self {
        // ERCOT real-time market: 24 hours x 15-minute intervals
        Self {
            hours_per_day: 24,
            intervals_per_hour: 4,
        }
    }
}

impl MarketConvention {
    /// Length of one delivery interval in minutes.
    pub fn interval_minutes(&self) -> u32 {
        60 / self.intervals_per_hour as u32
    }

    /// Number of delivery keys in one operating day.
    pub fn keys_per_day(&self) -> usize {
        self.hours_per_day as usize * self.intervals_per_hour as usize
    }

    /// Check that the convention is physically meaningful.
    pub fn validate(&self) -> Result<(), String> {
        if self.hours_per_day == 0 || self.hours_per_day > 24 {
            return Err(format!(
                "hours_per_day must be between 1 and 24, got {}",
                self.hours_per_day
            ));
        }
        if self.intervals_per_hour == 0 || 60 % self.intervals_per_hour as u32 != 0 {
            return Err(format!(
                "intervals_per_hour must divide 60 evenly, got {}",
                self.intervals_per_hour
            ));
        }
        Ok(())
    }
}

/// One settlement interval in the delivery grid.
///
/// `hour` uses hour-ending numbering: hour 1 covers 00:00-01:00 local market
/// time. `interval` is 1-based within the hour. Ordering is (date, hour,
/// interval) ascending, which is delivery order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DeliveryKey {
    pub date: NaiveDate,
    pub hour: u8,
    pub interval: u8,
}

impl DeliveryKey {
    pub fn new(date: NaiveDate, hour: u8, interval: u8) -> Self {
        Self {
            date,
            hour,
            interval,
        }
    }

    /// Wall-clock start of this delivery interval in local market time.
    ///
    /// A forecast published after this instant can no longer cover the
    /// interval and is treated as stale.
    pub fn delivery_start(&self, convention: &MarketConvention) -> NaiveDateTime {
        let minutes = (self.hour as i64 - 1) * 60
            + (self.interval as i64 - 1) * convention.interval_minutes() as i64;
        self.date.and_time(NaiveTime::MIN) + Duration::minutes(minutes)
    }
}

impl std::fmt::Display for DeliveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} H{:02} I{}", self.date, self.hour, self.interval)
    }
}

/// Inclusive range of operating days covered by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DeliveryRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Number of operating days in the range (inclusive); negative when
    /// start is after end.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + Clone {
        self.start.iter_days().take(self.days().max(0) as usize)
    }
}

impl std::fmt::Display for DeliveryRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_interval_minutes() {
        let conv = MarketConvention::default();
        assert_eq!(conv.interval_minutes(), 15);
        assert_eq!(conv.keys_per_day(), 96);

        let five_min = MarketConvention {
            hours_per_day: 24,
            intervals_per_hour: 12,
        };
        assert_eq!(five_min.interval_minutes(), 5);
        assert_eq!(five_min.keys_per_day(), 288);
    }

    #[test]
    fn test_convention_validate() {
        assert!(MarketConvention::default().validate().is_ok());
        assert!(MarketConvention {
            hours_per_day: 25,
            intervals_per_hour: 4
        }
        .validate()
        .is_err());
        assert!(MarketConvention {
            hours_per_day: 24,
            intervals_per_hour: 7
        }
        .validate()
        .is_err());
        assert!(MarketConvention {
            hours_per_day: 24,
            intervals_per_hour: 0
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_delivery_start_hour_ending() {
        let conv = MarketConvention::default();
        // Hour-ending 1, interval 1 starts at midnight.
        let first = DeliveryKey::new(date(2024, 6, 1), 1, 1);
        assert_eq!(
            first.delivery_start(&conv),
            date(2024, 6, 1).and_hms_opt(0, 0, 0).unwrap()
        );
        // Hour-ending 7, interval 3 starts at 06:30.
        let mid = DeliveryKey::new(date(2024, 6, 1), 7, 3);
        assert_eq!(
            mid.delivery_start(&conv),
            date(2024, 6, 1).and_hms_opt(6, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_key_ordering_is_delivery_order() {
        let d = date(2024, 6, 1);
        let a = DeliveryKey::new(d, 1, 4);
        let b = DeliveryKey::new(d, 2, 1);
        let c = DeliveryKey::new(date(2024, 6, 2), 1, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_range_days() {
        let one = DeliveryRange::new(date(2024, 1, 1), date(2024, 1, 1));
        assert_eq!(one.days(), 1);
        let week = DeliveryRange::new(date(2024, 1, 1), date(2024, 1, 7));
        assert_eq!(week.days(), 7);
        assert_eq!(week.dates().count(), 7);
        let inverted = DeliveryRange::new(date(2024, 1, 7), date(2024, 1, 1));
        assert!(inverted.days() < 0);
        assert_eq!(inverted.dates().count(), 0);
    }
}
