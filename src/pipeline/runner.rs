//! Run orchestration: grid -> fetch+normalize -> merge -> validate ->
//! predict -> export.
//!
//! A run is a pure function of its inputs and configuration until the export
//! step; aborting at any earlier stage leaves no side effects.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::domain::{DeliveryRange, FeatureMatrix, PredictionRow, RunMetadata, SourceId};
use crate::error::RunError;
use crate::export::{ExportSink, RunArtifact};
use crate::predict::Predictor;
use crate::provider::SourceProvider;

use super::grid::build_grid;
use super::merge::MergeEngine;
use super::normalize::{NormalizedSources, SourceNormalizer, SourceSeries};
use super::validate::{CompletenessValidator, CoverageReport};

/// Outcome of one successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub matrix: FeatureMatrix,
    pub predictions: Vec<PredictionRow>,
    pub report: CoverageReport,
    pub metadata: RunMetadata,
}

/// The full pipeline wired to its three external collaborators.
pub struct Pipeline {
    provider: Box<dyn SourceProvider>,
    predictor: Box<dyn Predictor>,
    sink: Box<dyn ExportSink>,
}

impl Pipeline {
    pub fn new(
        provider: Box<dyn SourceProvider>,
        predictor: Box<dyn Predictor>,
        sink: Box<dyn ExportSink>,
    ) -> Self {
        Self {
            provider,
            predictor,
            sink,
        }
    }

    /// Execute one run over `range` with a fresh run id.
    pub async fn run(&self, range: DeliveryRange, cfg: &RunConfig) -> Result<RunResult, RunError> {
        self.run_with_id(Uuid::new_v4(), range, cfg).await
    }

    /// Execute one run with a caller-supplied id. Re-running with the same
    /// id overwrites the previously exported artifact.
    pub async fn run_with_id(
        &self,
        run_id: Uuid,
        range: DeliveryRange,
        cfg: &RunConfig,
    ) -> Result<RunResult, RunError> {
        let grid = build_grid(&range, &cfg.market, cfg.max_span_days)?;
        info!(%run_id, %range, keys = grid.len(), "starting forecast run");

        // Sources have no data dependency on each other; fetch and normalize
        // them concurrently and join before the merge.
        let (solar, wind, load) = futures::try_join!(
            self.fetch_and_normalize(SourceId::Solar, range, cfg),
            self.fetch_and_normalize(SourceId::Wind, range, cfg),
            self.fetch_and_normalize(SourceId::Load, range, cfg),
        )?;
        let sources = NormalizedSources { solar, wind, load };

        let matrix = MergeEngine::new(&cfg.merge).merge(&grid, &sources);
        let report =
            CompletenessValidator::new(&cfg.acceptance).validate(&matrix, sources.drop_counts());
        if !report.passed {
            warn!(%run_id, rows = report.rows, "merged matrix failed acceptance");
            return Err(RunError::IncompleteData(Box::new(report)));
        }

        let predictions = self
            .predictor
            .predict(&matrix)
            .await
            .map_err(|e| RunError::Prediction(e.to_string()))?;
        check_alignment(&matrix, &predictions)?;

        let model_tag = predictions
            .first()
            .map(|p| p.model_tag.clone())
            .unwrap_or_default();
        let metadata = RunMetadata {
            range,
            model_tag,
            generated_at: Utc::now(),
            row_count: matrix.len(),
        };
        let artifact = RunArtifact {
            run_id,
            metadata: metadata.clone(),
            matrix: matrix.clone(),
            predictions: predictions.clone(),
            report: report.clone(),
        };
        self.sink
            .put(run_id, &artifact)
            .await
            .map_err(|e| RunError::Export(e.to_string()))?;
        info!(%run_id, rows = matrix.len(), "run exported");

        Ok(RunResult {
            run_id,
            matrix,
            predictions,
            report,
            metadata,
        })
    }

    async fn fetch_and_normalize(
        &self,
        source: SourceId,
        range: DeliveryRange,
        cfg: &RunConfig,
    ) -> Result<SourceSeries, RunError> {
        let payload = self
            .provider
            .fetch(source, range)
            .await
            .map_err(|e| RunError::Fetch {
                source_id: source,
                message: e.to_string(),
            })?;
        let schema = cfg.sources.for_source(source);
        SourceNormalizer::new(schema, &cfg.market).normalize(&payload)
    }
}

/// Predictions must align 1:1 with matrix rows by delivery key.
fn check_alignment(
    matrix: &FeatureMatrix,
    predictions: &[PredictionRow],
) -> Result<(), RunError> {
    if predictions.len() != matrix.len() {
        return Err(RunError::Prediction(format!(
            "predictor returned {} rows for a {}-row matrix",
            predictions.len(),
            matrix.len()
        )));
    }
    for (p, key) in predictions.iter().zip(matrix.keys()) {
        if &p.key != key {
            return Err(RunError::Prediction(format!(
                "prediction for {} does not align with matrix key {key}",
                p.key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::export::{MemoryExportSink, MockExportSink};
    use crate::predict::{MockPredictor, NetLoadPredictor};
    use crate::provider::{MockSourceProvider, SimSourceProvider};
    use chrono::NaiveDate;

    fn one_day() -> DeliveryRange {
        let d = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        DeliveryRange::new(d, d)
    }

    fn sim_pipeline(sink: MemoryExportSink) -> (Pipeline, RunConfig) {
        let cfg = RunConfig::default();
        let pipeline = Pipeline::new(
            Box::new(SimSourceProvider::new(cfg.market, 42)),
            Box::new(NetLoadPredictor::default()),
            Box::new(sink),
        );
        (pipeline, cfg)
    }

    #[tokio::test]
    async fn test_run_produces_full_matrix_and_predictions() {
        let sink = MemoryExportSink::new();
        let (pipeline, cfg) = sim_pipeline(sink.clone());
        let result = pipeline.run(one_day(), &cfg).await.unwrap();
        assert_eq!(result.matrix.len(), 96);
        assert_eq!(result.predictions.len(), 96);
        assert!(result.report.passed);
        assert_eq!(sink.count().await, 1);
        assert!(sink.get(result.run_id).await.is_some());
    }

    #[tokio::test]
    async fn test_invalid_range_aborts_before_fetch() {
        let mut provider = MockSourceProvider::new();
        provider.expect_fetch().times(0);
        let pipeline = Pipeline::new(
            Box::new(provider),
            Box::new(NetLoadPredictor::default()),
            Box::new(MemoryExportSink::new()),
        );
        let cfg = RunConfig::default();
        let d = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let range = DeliveryRange::new(d, d - chrono::Duration::days(1));
        let err = pipeline.run(range, &cfg).await.unwrap_err();
        assert!(matches!(err, RunError::InvalidRange(_)));
    }

    #[tokio::test]
    async fn test_misaligned_predictor_fails_without_export() {
        let mut predictor = MockPredictor::new();
        predictor
            .expect_predict()
            .returning(|_| Ok(Vec::new()));
        let mut sink = MockExportSink::new();
        sink.expect_put().times(0);
        let cfg = RunConfig::default();
        let pipeline = Pipeline::new(
            Box::new(SimSourceProvider::new(cfg.market, 42)),
            Box::new(predictor),
            Box::new(sink),
        );
        let err = pipeline.run(one_day(), &cfg).await.unwrap_err();
        assert!(matches!(err, RunError::Prediction(_)));
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces_as_fetch_error() {
        let mut provider = MockSourceProvider::new();
        provider
            .expect_fetch()
            .returning(|source, _| Err(anyhow::anyhow!("upstream 429 for {source}")));
        let pipeline = Pipeline::new(
            Box::new(provider),
            Box::new(NetLoadPredictor::default()),
            Box::new(MemoryExportSink::new()),
        );
        let cfg = RunConfig::default();
        let err = pipeline.run(one_day(), &cfg).await.unwrap_err();
        assert!(matches!(err, RunError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_rerun_with_same_id_overwrites() {
        let sink = MemoryExportSink::new();
        let (pipeline, cfg) = sim_pipeline(sink.clone());
        let run_id = Uuid::new_v4();
        pipeline.run_with_id(run_id, one_day(), &cfg).await.unwrap();
        pipeline.run_with_id(run_id, one_day(), &cfg).await.unwrap();
        assert_eq!(sink.count().await, 1);
    }
}
