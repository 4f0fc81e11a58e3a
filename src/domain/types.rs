//! Core value types flowing through the pipeline: raw payloads in, merged
//! feature rows and price predictions out.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keys::{DeliveryKey, DeliveryRange};

/// The closed set of upstream forecast feeds.
///
/// The source set is small and fixed by the market, so it is an enum rather
/// than open-ended dynamic dispatch.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceId {
    Solar,
    Wind,
    Load,
}

/// Native cadence of a source feed relative to the delivery grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One record per delivery interval, keyed by interval-ending timestamp.
    PerInterval,
    /// One record per operating hour; disaggregated onto the grid.
    Hourly,
}

/// Raw provider payload: loosely typed records plus publication metadata.
///
/// The upstream client is an external collaborator; the only contract is
/// that it declares when the payload was published, in what unit, and at
/// what cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPayload {
    pub source: SourceId,
    /// Publication timestamp in local market time, applied to every record
    /// unless the schema names a per-record field.
    pub published_at: NaiveDateTime,
    pub unit: String,
    pub granularity: Granularity,
    pub records: Vec<serde_json::Value>,
}

/// One normalized feature value for a delivery key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceSample {
    pub value: f64,
    pub published_at: NaiveDateTime,
}

/// A feature cell in the merged matrix.
///
/// Absent data is an explicit `Missing` marker, never a silent zero. `Filled`
/// records that the value came from a gap-fill policy rather than the feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum FeatureCell {
    Observed(f64),
    Filled(f64),
    Missing,
}

impl FeatureCell {
    pub fn value(&self) -> Option<f64> {
        match self {
            FeatureCell::Observed(v) | FeatureCell::Filled(v) => Some(*v),
            FeatureCell::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FeatureCell::Missing)
    }
}

/// One row of the merged feature matrix: every feature column for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRow {
    pub key: DeliveryKey,
    pub solar_mw: FeatureCell,
    pub wind_mw: FeatureCell,
    pub load_mw: FeatureCell,
}

impl MergedRow {
    pub fn cell(&self, source: SourceId) -> &FeatureCell {
        match source {
            SourceId::Solar => &self.solar_mw,
            SourceId::Wind => &self.wind_mw,
            SourceId::Load => &self.load_mw,
        }
    }
}

/// Merged feature rows in canonical delivery order.
///
/// Built fresh per run, immutable once handed to the predictor. Row order is
/// load-bearing: downstream consumers expect chronological sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub rows: Vec<MergedRow>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &DeliveryKey> {
        self.rows.iter().map(|r| &r.key)
    }
}

/// Predicted settlement price for one delivery key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub key: DeliveryKey,
    pub price_usd_per_mwh: f64,
    /// Model/version tag, e.g. "net-load-baseline/v1".
    pub model_tag: String,
    pub generated_at: DateTime<Utc>,
}

/// Run-level metadata attached to every exported artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub range: DeliveryRange,
    pub model_tag: String,
    pub generated_at: DateTime<Utc>,
    pub row_count: usize,
}
