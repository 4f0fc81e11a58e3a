//! Merge engine: left-join of the canonical grid against each source.
//!
//! The join semantics are explicit: the grid drives, sources are looked up
//! per key, and gaps are resolved by a per-column policy. The output is a
//! pure function of inputs and configuration.

use serde::{Deserialize, Serialize};

use crate::domain::{DeliveryKey, FeatureCell, FeatureMatrix, MergedRow, SourceId};

use super::normalize::{NormalizedSources, SourceSeries};

/// Rule applied when a source has no sample for a delivery key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum GapFillPolicy {
    /// Leave the cell missing and let the validator flag it.
    HoldMissing,
    /// Carry the nearest earlier observed value forward, at most
    /// `max_lookback` keys back. Longer gaps stay missing.
    ForwardFill { max_lookback: u32 },
    /// Source-specific default value.
    Constant { value: f64 },
}

impl Default for GapFillPolicy {
    fn default() -> Self {
        // One hour of look-back on the default 15-minute grid.
        GapFillPolicy::ForwardFill { max_lookback: 4 }
    }
}

/// Per-column gap-fill configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergePolicies {
    pub solar: GapFillPolicy,
    pub wind: GapFillPolicy,
    pub load: GapFillPolicy,
}

impl MergePolicies {
    pub fn for_source(&self, source: SourceId) -> GapFillPolicy {
        match source {
            SourceId::Solar => self.solar,
            SourceId::Wind => self.wind,
            SourceId::Load => self.load,
        }
    }
}

pub struct MergeEngine<'a> {
    policies: &'a MergePolicies,
}

impl<'a> MergeEngine<'a> {
    pub fn new(policies: &'a MergePolicies) -> Self {
        Self { policies }
    }

    /// Left-join the canonical grid against each normalized source.
    ///
    /// Produces one row per grid key in canonical order. Deterministic:
    /// identical inputs and policies yield a byte-identical matrix.
    pub fn merge(&self, grid: &[DeliveryKey], sources: &NormalizedSources) -> FeatureMatrix {
        let solar = self.merge_column(grid, &sources.solar, self.policies.solar);
        let wind = self.merge_column(grid, &sources.wind, self.policies.wind);
        let load = self.merge_column(grid, &sources.load, self.policies.load);

        let rows = grid
            .iter()
            .enumerate()
            .map(|(i, &key)| MergedRow {
                key,
                solar_mw: solar[i],
                wind_mw: wind[i],
                load_mw: load[i],
            })
            .collect();
        FeatureMatrix { rows }
    }

    fn merge_column(
        &self,
        grid: &[DeliveryKey],
        series: &SourceSeries,
        policy: GapFillPolicy,
    ) -> Vec<FeatureCell> {
        let mut cells = Vec::with_capacity(grid.len());
        let mut last_observed: Option<(usize, f64)> = None;

        for (idx, key) in grid.iter().enumerate() {
            let cell = match series.values.get(key) {
                Some(sample) => {
                    last_observed = Some((idx, sample.value));
                    FeatureCell::Observed(sample.value)
                }
                None => match policy {
                    GapFillPolicy::HoldMissing => FeatureCell::Missing,
                    GapFillPolicy::Constant { value } => FeatureCell::Filled(value),
                    GapFillPolicy::ForwardFill { max_lookback } => match last_observed {
                        Some((i, v)) if idx - i <= max_lookback as usize => {
                            FeatureCell::Filled(v)
                        }
                        _ => FeatureCell::Missing,
                    },
                },
            };
            cells.push(cell);
        }
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketConvention, SourceSample};
    use crate::error::RecordError;
    use crate::pipeline::grid::build_grid;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn series(source: SourceId, samples: &[(DeliveryKey, f64)]) -> SourceSeries {
        let published = NaiveDate::from_ymd_opt(2024, 5, 31)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        SourceSeries {
            source,
            values: samples
                .iter()
                .map(|&(k, v)| (k, SourceSample { value: v, published_at: published }))
                .collect::<BTreeMap<_, _>>(),
            dropped: Vec::new(),
        }
    }

    fn one_day_grid() -> Vec<DeliveryKey> {
        let d = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        build_grid(
            &crate::domain::DeliveryRange::new(d, d),
            &MarketConvention::default(),
            14,
        )
        .unwrap()
    }

    fn full_series(source: SourceId, grid: &[DeliveryKey], value: f64) -> SourceSeries {
        series(
            source,
            &grid.iter().map(|&k| (k, value)).collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_single_gap_forward_filled_from_earlier_key() {
        let grid = one_day_grid();
        let mut wind = full_series(SourceId::Wind, &grid, 5000.0);
        let gap_key = grid[10];
        wind.values.remove(&gap_key);
        let published_at = wind.values[&grid[8]].published_at;
        wind.values.insert(grid[9], SourceSample { value: 4321.0, published_at });

        let policies = MergePolicies::default();
        let sources = NormalizedSources {
            solar: full_series(SourceId::Solar, &grid, 100.0),
            wind,
            load: full_series(SourceId::Load, &grid, 40000.0),
        };
        let matrix = MergeEngine::new(&policies).merge(&grid, &sources);
        assert_eq!(matrix.rows[10].wind_mw, FeatureCell::Filled(4321.0));
        assert_eq!(matrix.rows[9].wind_mw, FeatureCell::Observed(4321.0));
    }

    #[test]
    fn test_gap_beyond_lookback_stays_missing() {
        let grid = one_day_grid();
        // Only the very first key has data; ForwardFill with max_lookback 4
        // covers keys 1..=4 and leaves the rest missing.
        let wind = series(SourceId::Wind, &[(grid[0], 5000.0)]);
        let policies = MergePolicies::default();
        let sources = NormalizedSources {
            solar: full_series(SourceId::Solar, &grid, 100.0),
            wind,
            load: full_series(SourceId::Load, &grid, 40000.0),
        };
        let matrix = MergeEngine::new(&policies).merge(&grid, &sources);
        assert_eq!(matrix.rows[4].wind_mw, FeatureCell::Filled(5000.0));
        assert_eq!(matrix.rows[5].wind_mw, FeatureCell::Missing);
        assert_eq!(matrix.rows[95].wind_mw, FeatureCell::Missing);
    }

    #[test]
    fn test_hold_missing_and_constant_policies() {
        let grid = one_day_grid();
        let policies = MergePolicies {
            solar: GapFillPolicy::Constant { value: 0.0 },
            wind: GapFillPolicy::HoldMissing,
            load: GapFillPolicy::default(),
        };
        let empty_solar = series(SourceId::Solar, &[]);
        let empty_wind = series(SourceId::Wind, &[]);
        let sources = NormalizedSources {
            solar: empty_solar,
            wind: empty_wind,
            load: full_series(SourceId::Load, &grid, 40000.0),
        };
        let matrix = MergeEngine::new(&policies).merge(&grid, &sources);
        assert!(matrix.rows.iter().all(|r| r.solar_mw == FeatureCell::Filled(0.0)));
        assert!(matrix.rows.iter().all(|r| r.wind_mw == FeatureCell::Missing));
    }

    #[test]
    fn test_merge_preserves_canonical_order_and_row_count() {
        let grid = one_day_grid();
        let sources = NormalizedSources {
            solar: full_series(SourceId::Solar, &grid, 1.0),
            wind: full_series(SourceId::Wind, &grid, 2.0),
            load: full_series(SourceId::Load, &grid, 3.0),
        };
        let matrix = MergeEngine::new(&MergePolicies::default()).merge(&grid, &sources);
        assert_eq!(matrix.len(), grid.len());
        assert!(matrix
            .keys()
            .zip(grid.iter())
            .all(|(a, b)| a == b));
    }

    #[test]
    fn test_merge_is_byte_identical_across_runs() {
        let grid = one_day_grid();
        let mut wind = full_series(SourceId::Wind, &grid, 5000.0);
        wind.values.remove(&grid[40]);
        wind.dropped.push(RecordError::SchemaViolation("x".into()));
        let sources = NormalizedSources {
            solar: full_series(SourceId::Solar, &grid, 100.0),
            wind,
            load: full_series(SourceId::Load, &grid, 40000.0),
        };
        let policies = MergePolicies::default();
        let a = MergeEngine::new(&policies).merge(&grid, &sources);
        let b = MergeEngine::new(&policies).merge(&grid, &sources);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
