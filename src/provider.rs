//! Upstream data provider boundary.
//!
//! Fetching real market data (auth, paging, retries) belongs to an external
//! collaborator; the core only requires a payload with a declared publication
//! timestamp, unit, and granularity. `SimSourceProvider` generates plausible
//! synthetic feeds so the pipeline runs end to end without credentials.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, NaiveTime};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;
use std::f64::consts::PI;

use crate::domain::{DeliveryRange, Granularity, MarketConvention, RawPayload, SourceId};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch the raw forecast payload for one source over the range.
    async fn fetch(&self, source: SourceId, range: DeliveryRange) -> Result<RawPayload>;
}

/// Deterministic synthetic provider.
///
/// Solar and load are hourly feeds (exercising disaggregation), wind is a
/// per-interval feed with seeded noise. Payloads are published well before
/// the range starts, so nothing is stale.
pub struct SimSourceProvider {
    convention: MarketConvention,
    seed: u64,
}

impl SimSourceProvider {
    pub fn new(convention: MarketConvention, seed: u64) -> Self {
        Self { convention, seed }
    }

    /// Day-ahead publication stamp: six hours before the range begins.
    fn published_at(&self, range: &DeliveryRange) -> NaiveDateTime {
        range.start.and_time(NaiveTime::MIN) - Duration::hours(6)
    }

    fn solar_payload(&self, range: &DeliveryRange) -> RawPayload {
        let mut records = Vec::new();
        for date in range.dates() {
            for hour in 1..=self.convention.hours_per_day {
                // Mid-hour solar elevation: zero before ~06:00 and after ~18:00.
                let h = hour as f64 - 0.5;
                let elevation = (PI * (h - 6.0) / 12.0).sin();
                let mw = (elevation.max(0.0) * 9500.0 * 100.0).round() / 100.0;
                records.push(json!({
                    "DELIVERY_DATE": date.format("%Y-%m-%d").to_string(),
                    "HOUR_ENDING": hour,
                    "COP_HSL_SYSTEM_WIDE": mw,
                }));
            }
        }
        RawPayload {
            source: SourceId::Solar,
            published_at: self.published_at(range),
            unit: "MW".to_string(),
            granularity: Granularity::Hourly,
            records,
        }
    }

    fn wind_payload(&self, range: &DeliveryRange) -> RawPayload {
        let published = self.published_at(range);
        let posted = published.format("%Y-%m-%dT%H:%M:%S").to_string();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let step = self.convention.interval_minutes() as i64;
        let mut records = Vec::new();
        for date in range.dates() {
            for hour in 0..self.convention.hours_per_day {
                for interval in 0..self.convention.intervals_per_hour {
                    let minutes = hour as i64 * 60 + interval as i64 * step;
                    let ts = date.and_time(NaiveTime::MIN) + Duration::minutes(minutes);
                    let mw: f64 = 5500.0 + rng.gen_range(-1800.0..1800.0);
                    records.push(json!({
                        "intervalEnding": ts.format("%Y-%m-%dT%H:%M:%S").to_string(),
                        "systemWide": (mw * 100.0).round() / 100.0,
                        "postedDatetime": posted,
                    }));
                }
            }
        }
        RawPayload {
            source: SourceId::Wind,
            published_at: published,
            unit: "MW".to_string(),
            granularity: Granularity::PerInterval,
            records,
        }
    }

    fn load_payload(&self, range: &DeliveryRange) -> RawPayload {
        let mut records = Vec::new();
        for date in range.dates() {
            for hour in 1..=self.convention.hours_per_day {
                let h = hour as f64 - 0.5;
                let mw = 40000.0 + 8000.0 * bump(h, 8.0, 2.5) + 12000.0 * bump(h, 19.0, 3.0);
                records.push(json!({
                    "DeliveryDate": date.format("%Y-%m-%d").to_string(),
                    "HourEnding": format!("{hour:02}:00"),
                    "SystemTotal": (mw * 100.0).round() / 100.0,
                }));
            }
        }
        RawPayload {
            source: SourceId::Load,
            published_at: self.published_at(range),
            unit: "MW".to_string(),
            granularity: Granularity::Hourly,
            records,
        }
    }
}

#[async_trait]
impl SourceProvider for SimSourceProvider {
    async fn fetch(&self, source: SourceId, range: DeliveryRange) -> Result<RawPayload> {
        Ok(match source {
            SourceId::Solar => self.solar_payload(&range),
            SourceId::Wind => self.wind_payload(&range),
            SourceId::Load => self.load_payload(&range),
        })
    }
}

fn bump(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma.max(0.01);
    (-0.5 * z * z).exp()
}
