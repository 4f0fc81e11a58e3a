//! Completeness validation: the only gate between raw merge output and the
//! predictor. A matrix with unresolved gaps in a mandatory column never
//! reaches prediction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use validator::Validate;

use crate::domain::{DeliveryKey, FeatureMatrix, SourceId};

use super::normalize::DropCounts;

/// Acceptance thresholds for one feature column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct ColumnAcceptance {
    /// Mandatory columns must meet coverage and gap-run limits; optional
    /// columns are reported but never fail the run.
    pub mandatory: bool,
    /// Minimum fraction of rows with a present (observed or filled) value.
    /// A coverage exactly at the threshold passes.
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_coverage: f64,
}

impl Default for ColumnAcceptance {
    fn default() -> Self {
        Self {
            mandatory: true,
            min_coverage: 0.95,
        }
    }
}

/// Acceptance configuration for the whole matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AcceptanceConfig {
    #[validate(nested)]
    pub solar: ColumnAcceptance,
    #[validate(nested)]
    pub wind: ColumnAcceptance,
    #[validate(nested)]
    pub load: ColumnAcceptance,
    /// Longest tolerated run of consecutive missing cells in a mandatory
    /// column.
    pub max_gap_run: u32,
}

impl Default for AcceptanceConfig {
    fn default() -> Self {
        Self {
            solar: ColumnAcceptance::default(),
            wind: ColumnAcceptance::default(),
            load: ColumnAcceptance::default(),
            max_gap_run: 8,
        }
    }
}

impl AcceptanceConfig {
    pub fn for_source(&self, source: SourceId) -> ColumnAcceptance {
        match source {
            SourceId::Solar => self.solar,
            SourceId::Wind => self.wind,
            SourceId::Load => self.load,
        }
    }
}

/// A run of consecutive missing cells in one column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapRange {
    pub start: DeliveryKey,
    pub end: DeliveryKey,
    pub len: usize,
}

/// Coverage outcome for one feature column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnCoverage {
    pub column: SourceId,
    pub present: usize,
    /// present / rows; 0.0 for an empty matrix.
    pub coverage: f64,
    pub gaps: Vec<GapRange>,
    pub longest_gap: usize,
    pub passed: bool,
}

/// Structured verdict for one merged matrix. Per-record drops recovered
/// during normalization are carried here so nothing is silently ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub rows: usize,
    pub columns: Vec<ColumnCoverage>,
    pub drops: BTreeMap<SourceId, DropCounts>,
    pub passed: bool,
}

impl CoverageReport {
    pub fn column(&self, source: SourceId) -> Option<&ColumnCoverage> {
        self.columns.iter().find(|c| c.column == source)
    }
}

pub struct CompletenessValidator<'a> {
    acceptance: &'a AcceptanceConfig,
}

impl<'a> CompletenessValidator<'a> {
    pub fn new(acceptance: &'a AcceptanceConfig) -> Self {
        Self { acceptance }
    }

    /// Check the merged matrix against acceptance criteria and produce the
    /// structured report.
    pub fn validate(
        &self,
        matrix: &FeatureMatrix,
        drops: BTreeMap<SourceId, DropCounts>,
    ) -> CoverageReport {
        let rows = matrix.len();
        let columns: Vec<ColumnCoverage> = SourceId::iter()
            .map(|source| self.check_column(matrix, source))
            .collect();
        let passed = rows > 0 && columns.iter().all(|c| c.passed);
        CoverageReport {
            rows,
            columns,
            drops,
            passed,
        }
    }

    fn check_column(&self, matrix: &FeatureMatrix, source: SourceId) -> ColumnCoverage {
        let rows = matrix.len();
        let mut present = 0usize;
        let mut gaps: Vec<GapRange> = Vec::new();
        let mut run_start: Option<usize> = None;

        for (idx, row) in matrix.rows.iter().enumerate() {
            if row.cell(source).is_missing() {
                run_start.get_or_insert(idx);
            } else {
                present += 1;
                if let Some(start) = run_start.take() {
                    gaps.push(gap_range(matrix, start, idx - 1));
                }
            }
        }
        if let Some(start) = run_start {
            gaps.push(gap_range(matrix, start, rows - 1));
        }

        let coverage = if rows == 0 {
            0.0
        } else {
            present as f64 / rows as f64
        };
        let longest_gap = gaps.iter().map(|g| g.len).max().unwrap_or(0);

        let acceptance = self.acceptance.for_source(source);
        let passed = !acceptance.mandatory
            || (coverage >= acceptance.min_coverage
                && longest_gap <= self.acceptance.max_gap_run as usize);

        ColumnCoverage {
            column: source,
            present,
            coverage,
            gaps,
            longest_gap,
            passed,
        }
    }
}

fn gap_range(matrix: &FeatureMatrix, start: usize, end: usize) -> GapRange {
    GapRange {
        start: matrix.rows[start].key,
        end: matrix.rows[end].key,
        len: end - start + 1,
    }
}
