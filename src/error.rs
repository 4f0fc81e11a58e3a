//! Error taxonomy for a forecast run.
//!
//! Run-level errors abort the pipeline before anything is exported, so
//! published results are always complete and internally consistent.
//! Per-record errors are recovered by dropping the record; every drop is
//! counted in the coverage report.

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::domain::SourceId;
use crate::pipeline::validate::CoverageReport;

/// Run-level failures. All of these abort the run before the export write.
#[derive(Debug, Error)]
pub enum RunError {
    /// Bad input range; the caller must correct it.
    #[error("invalid delivery range: {0}")]
    InvalidRange(String),

    /// The upstream provider could not supply a payload.
    ///
    /// The field is `source_id` rather than `source` because thiserror
    /// reserves that name for the error cause.
    #[error("failed to fetch {source_id} payload: {message}")]
    Fetch {
        source_id: SourceId,
        message: String,
    },

    /// Too many delivery keys from one source were dropped; retry later.
    #[error("source {source_id} unreliable: dropped {dropped} of {total} keys")]
    SourceUnreliable {
        source_id: SourceId,
        dropped: usize,
        total: usize,
    },

    /// The merged matrix did not meet acceptance criteria. Non-destructive:
    /// nothing was written, and the run can be retried once more source data
    /// is available. Carries the full report for diagnosis.
    #[error("merged matrix failed acceptance criteria")]
    IncompleteData(Box<CoverageReport>),

    /// The predictor failed or returned misaligned rows; no partial
    /// predictions are published.
    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("export failed: {0}")]
    Export(String),
}

/// Per-record failures during normalization, recovered by dropping the
/// offending record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    /// Missing required field, unparseable value, or unit mismatch.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// The record was published after the delivery interval it covers began.
    #[error("stale forecast: published {published_at} after delivery start {delivery_start}")]
    StaleForecast {
        published_at: NaiveDateTime,
        delivery_start: NaiveDateTime,
    },
}
