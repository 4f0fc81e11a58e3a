//! Source normalization: raw provider payloads to per-key feature samples.
//!
//! Each source feed has its own field names, cadence, and publication
//! semantics. The normalizer validates records against the source schema,
//! derives delivery keys, disaggregates coarser feeds onto the grid, and
//! drops (but counts) anything stale or malformed.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use validator::Validate;

use crate::domain::{DeliveryKey, Granularity, MarketConvention, RawPayload, SourceId, SourceSample};
use crate::error::{RecordError, RunError};

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// How a coarser-than-grid value is spread across sub-intervals.
///
/// The policy is fixed per source in configuration, never chosen per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisaggregationPolicy {
    /// Repeat the hourly value across every interval of the hour.
    #[default]
    Repeat,
    /// Interpolate linearly towards the next hour's value; the final hour
    /// with no successor repeats.
    Interpolate,
    /// Divide the hourly value evenly across the intervals, conserving the
    /// hourly total (used for system load totals).
    SplitEven,
}

/// Declarative schema for one source feed.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceSchema {
    /// Expected unit declared by the provider (e.g. "MW").
    pub unit: String,
    pub granularity: Granularity,
    pub disaggregation: DisaggregationPolicy,
    /// Field holding the interval-ending timestamp (per-interval feeds).
    pub timestamp_field: Option<String>,
    /// Field holding the delivery date (hourly feeds).
    pub date_field: Option<String>,
    /// Field holding the hour-ending, numeric or "HH:00" (hourly feeds).
    pub hour_field: Option<String>,
    /// Field holding the feature value.
    pub value_field: String,
    /// Optional per-record publication stamp; the payload-level stamp is
    /// used when absent.
    pub published_field: Option<String>,
    /// Dropped-record fraction above which the source is unreliable.
    #[validate(range(min = 0.0, max = 1.0))]
    pub max_drop_fraction: f64,
}

impl SourceSchema {
    /// Check that the key fields required by the granularity are configured.
    pub fn check_fields(&self) -> Result<(), String> {
        match self.granularity {
            Granularity::PerInterval if self.timestamp_field.is_none() => {
                Err("per-interval schema requires timestamp_field".to_string())
            }
            Granularity::Hourly if self.date_field.is_none() || self.hour_field.is_none() => {
                Err("hourly schema requires date_field and hour_field".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Per-reason drop tally for one source, carried into the coverage report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounts {
    pub schema_violations: usize,
    pub stale_forecasts: usize,
}

impl DropCounts {
    pub fn total(&self) -> usize {
        self.schema_violations + self.stale_forecasts
    }
}

/// Normalized output of one source for a run: samples keyed by delivery key
/// plus the full drop accounting.
#[derive(Debug, Clone)]
pub struct SourceSeries {
    pub source: SourceId,
    pub values: BTreeMap<DeliveryKey, SourceSample>,
    pub dropped: Vec<RecordError>,
}

impl SourceSeries {
    pub fn drop_counts(&self) -> DropCounts {
        let mut counts = DropCounts::default();
        for err in &self.dropped {
            match err {
                RecordError::SchemaViolation(_) => counts.schema_violations += 1,
                RecordError::StaleForecast { .. } => counts.stale_forecasts += 1,
            }
        }
        counts
    }
}

/// All three normalized sources, joined before the merge step.
#[derive(Debug, Clone)]
pub struct NormalizedSources {
    pub solar: SourceSeries,
    pub wind: SourceSeries,
    pub load: SourceSeries,
}

impl NormalizedSources {
    pub fn for_source(&self, source: SourceId) -> &SourceSeries {
        match source {
            SourceId::Solar => &self.solar,
            SourceId::Wind => &self.wind,
            SourceId::Load => &self.load,
        }
    }

    pub fn drop_counts(&self) -> BTreeMap<SourceId, DropCounts> {
        [&self.solar, &self.wind, &self.load]
            .into_iter()
            .map(|s| (s.source, s.drop_counts()))
            .collect()
    }
}

/// Normalizer for one source feed.
pub struct SourceNormalizer<'a> {
    schema: &'a SourceSchema,
    convention: &'a MarketConvention,
}

impl<'a> SourceNormalizer<'a> {
    pub fn new(schema: &'a SourceSchema, convention: &'a MarketConvention) -> Self {
        Self { schema, convention }
    }

    /// Normalize a raw payload into per-key samples.
    ///
    /// Records that violate the schema or are stale are dropped and counted;
    /// the whole source fails with `SourceUnreliable` only when the dropped
    /// fraction exceeds the schema's threshold. Duplicate keys keep the
    /// first occurrence.
    ///
    /// Drops are tallied in delivery-key units: one bad hourly record counts
    /// as `intervals_per_hour` dropped keys, matching the weight its kept
    /// siblings carry after disaggregation.
    pub fn normalize(&self, payload: &RawPayload) -> Result<SourceSeries, RunError> {
        let mut series = SourceSeries {
            source: payload.source,
            values: BTreeMap::new(),
            dropped: Vec::new(),
        };

        if !payload.unit.eq_ignore_ascii_case(&self.schema.unit) {
            warn!(
                source = %payload.source,
                declared = %payload.unit,
                expected = %self.schema.unit,
                "payload unit mismatch, dropping all records"
            );
            let err = RecordError::SchemaViolation(format!(
                "unit `{}` does not match expected `{}`",
                payload.unit, self.schema.unit
            ));
            for _ in 0..payload.records.len() * self.record_weight() {
                series.dropped.push(err.clone());
            }
        } else {
            match self.schema.granularity {
                Granularity::PerInterval => self.collect_interval_samples(payload, &mut series),
                Granularity::Hourly => self.collect_hourly_samples(payload, &mut series),
            }
        }

        let total = series.values.len() + series.dropped.len();
        if total > 0 {
            let fraction = series.dropped.len() as f64 / total as f64;
            if fraction > self.schema.max_drop_fraction {
                return Err(RunError::SourceUnreliable {
                    source_id: payload.source,
                    dropped: series.dropped.len(),
                    total,
                });
            }
        }
        debug!(
            source = %payload.source,
            samples = series.values.len(),
            dropped = series.dropped.len(),
            "normalized payload"
        );
        Ok(series)
    }

    fn collect_interval_samples(&self, payload: &RawPayload, series: &mut SourceSeries) {
        let Some(ts_field) = self.schema.timestamp_field.as_deref() else {
            for _ in &payload.records {
                series.dropped.push(RecordError::SchemaViolation(
                    "schema has no timestamp_field for per-interval feed".to_string(),
                ));
            }
            return;
        };

        for record in &payload.records {
            match self.parse_interval_record(record, ts_field, payload) {
                Ok((key, value, published_at)) => {
                    self.insert_sample(series, key, value, published_at);
                }
                Err(err) => {
                    warn!(source = %payload.source, error = %err, "dropping record");
                    series.dropped.push(err);
                }
            }
        }
    }

    fn parse_interval_record(
        &self,
        record: &Value,
        ts_field: &str,
        payload: &RawPayload,
    ) -> Result<(DeliveryKey, f64, NaiveDateTime), RecordError> {
        let ts = timestamp_field(record, ts_field)?;
        let value = numeric_field(record, &self.schema.value_field)?;
        let published_at = self.record_published_at(record, payload)?;

        let hour = ts.hour() as u8 + 1;
        if hour > self.convention.hours_per_day {
            return Err(RecordError::SchemaViolation(format!(
                "timestamp {ts} falls outside the {}-hour market day",
                self.convention.hours_per_day
            )));
        }
        let interval = (ts.minute() / self.convention.interval_minutes()) as u8 + 1;
        Ok((DeliveryKey::new(ts.date(), hour, interval), value, published_at))
    }

    fn collect_hourly_samples(&self, payload: &RawPayload, series: &mut SourceSeries) {
        let (Some(date_field), Some(hour_field)) = (
            self.schema.date_field.as_deref(),
            self.schema.hour_field.as_deref(),
        ) else {
            let err = RecordError::SchemaViolation(
                "schema has no date_field/hour_field for hourly feed".to_string(),
            );
            for _ in 0..payload.records.len() * self.record_weight() {
                series.dropped.push(err.clone());
            }
            return;
        };

        // First pass: one value per (date, hour-ending), duplicates keep the
        // first occurrence.
        let mut hourly: BTreeMap<(NaiveDate, u8), (f64, NaiveDateTime)> = BTreeMap::new();
        for record in &payload.records {
            match self.parse_hourly_record(record, date_field, hour_field, payload) {
                Ok((date, hour, value, published_at)) => {
                    hourly.entry((date, hour)).or_insert((value, published_at));
                }
                Err(err) => {
                    warn!(source = %payload.source, error = %err, "dropping record");
                    // A lost hourly record is a full hour of lost keys.
                    for _ in 0..self.record_weight() {
                        series.dropped.push(err.clone());
                    }
                }
            }
        }

        // Second pass: expand each hour onto the interval grid.
        let n = self.convention.intervals_per_hour;
        for (&(date, hour), &(value, published_at)) in &hourly {
            let next_value = self
                .next_hour_slot(date, hour)
                .and_then(|slot| hourly.get(&slot))
                .map(|(v, _)| *v);
            for interval in 1..=n {
                let v = match self.schema.disaggregation {
                    DisaggregationPolicy::Repeat => value,
                    DisaggregationPolicy::SplitEven => value / n as f64,
                    DisaggregationPolicy::Interpolate => match next_value {
                        Some(nv) => value + (nv - value) * ((interval - 1) as f64 / n as f64),
                        None => value,
                    },
                };
                self.insert_sample(series, DeliveryKey::new(date, hour, interval), v, published_at);
            }
        }
    }

    fn parse_hourly_record(
        &self,
        record: &Value,
        date_field: &str,
        hour_field: &str,
        payload: &RawPayload,
    ) -> Result<(NaiveDate, u8, f64, NaiveDateTime), RecordError> {
        let date = date_field_value(record, date_field)?;
        let hour = hour_field_value(record, hour_field)?;
        if hour == 0 || hour > self.convention.hours_per_day {
            return Err(RecordError::SchemaViolation(format!(
                "hour-ending {hour} outside 1..={}",
                self.convention.hours_per_day
            )));
        }
        let value = numeric_field(record, &self.schema.value_field)?;
        let published_at = self.record_published_at(record, payload)?;
        Ok((date, hour, value, published_at))
    }

    /// Delivery keys covered by one record of this feed.
    fn record_weight(&self) -> usize {
        match self.schema.granularity {
            Granularity::Hourly => self.convention.intervals_per_hour as usize,
            Granularity::PerInterval => 1,
        }
    }

    fn next_hour_slot(&self, date: NaiveDate, hour: u8) -> Option<(NaiveDate, u8)> {
        if hour < self.convention.hours_per_day {
            Some((date, hour + 1))
        } else {
            date.succ_opt().map(|d| (d, 1))
        }
    }

    fn record_published_at(
        &self,
        record: &Value,
        payload: &RawPayload,
    ) -> Result<NaiveDateTime, RecordError> {
        match self.schema.published_field.as_deref() {
            Some(field) if record.get(field).is_some() => timestamp_field(record, field),
            _ => Ok(payload.published_at),
        }
    }

    /// Insert one sample, enforcing the staleness invariant: a forecast
    /// published after the interval's start never reaches the merge.
    fn insert_sample(
        &self,
        series: &mut SourceSeries,
        key: DeliveryKey,
        value: f64,
        published_at: NaiveDateTime,
    ) {
        let delivery_start = key.delivery_start(self.convention);
        if published_at > delivery_start {
            let err = RecordError::StaleForecast {
                published_at,
                delivery_start,
            };
            warn!(source = %series.source, key = %key, error = %err, "dropping stale sample");
            series.dropped.push(err);
            return;
        }
        if series.values.contains_key(&key) {
            debug!(source = %series.source, key = %key, "duplicate sample ignored");
            return;
        }
        series.values.insert(key, SourceSample { value, published_at });
    }
}

fn field<'v>(record: &'v Value, name: &str) -> Result<&'v Value, RecordError> {
    record
        .get(name)
        .ok_or_else(|| RecordError::SchemaViolation(format!("missing required field `{name}`")))
}

fn numeric_field(record: &Value, name: &str) -> Result<f64, RecordError> {
    match field(record, name)? {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            RecordError::SchemaViolation(format!("field `{name}` is not a finite number"))
        }),
        Value::String(s) => s.trim().parse().map_err(|_| {
            RecordError::SchemaViolation(format!("field `{name}` is not numeric: `{s}`"))
        }),
        _ => Err(RecordError::SchemaViolation(format!(
            "field `{name}` has unsupported type"
        ))),
    }
}

fn string_field<'v>(record: &'v Value, name: &str) -> Result<&'v str, RecordError> {
    field(record, name)?.as_str().ok_or_else(|| {
        RecordError::SchemaViolation(format!("field `{name}` is not a string"))
    })
}

fn timestamp_field(record: &Value, name: &str) -> Result<NaiveDateTime, RecordError> {
    let raw = string_field(record, name)?;
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts);
        }
    }
    Err(RecordError::SchemaViolation(format!(
        "field `{name}` is not a timestamp: `{raw}`"
    )))
}

fn date_field_value(record: &Value, name: &str) -> Result<NaiveDate, RecordError> {
    let raw = string_field(record, name)?;
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Ok(d);
        }
    }
    Err(RecordError::SchemaViolation(format!(
        "field `{name}` is not a date: `{raw}`"
    )))
}

/// Hour-ending is published either as a number (7) or a string ("07:00").
fn hour_field_value(record: &Value, name: &str) -> Result<u8, RecordError> {
    match field(record, name)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|h| u8::try_from(h).ok())
            .ok_or_else(|| {
                RecordError::SchemaViolation(format!("field `{name}` is not a valid hour"))
            }),
        Value::String(s) => s
            .split(':')
            .next()
            .and_then(|h| h.trim().parse::<u8>().ok())
            .ok_or_else(|| {
                RecordError::SchemaViolation(format!("field `{name}` is not a valid hour: `{s}`"))
            }),
        _ => Err(RecordError::SchemaViolation(format!(
            "field `{name}` has unsupported type"
        ))),
    }
}
