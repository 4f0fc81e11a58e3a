use anyhow::Result;
use chrono::{Duration, Utc};
use gridcast::config::Config;
use gridcast::domain::DeliveryRange;
use gridcast::error::RunError;
use gridcast::export::JsonExportSink;
use gridcast::pipeline::Pipeline;
use gridcast::predict::NetLoadPredictor;
use gridcast::provider::SimSourceProvider;
use gridcast::telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load()?;

    // Day-ahead horizon: tomorrow through tomorrow + horizon_days - 1.
    let tomorrow = Utc::now().date_naive() + Duration::days(1);
    let range = DeliveryRange::new(tomorrow, tomorrow + Duration::days(cfg.run.horizon_days - 1));

    let pipeline = Pipeline::new(
        Box::new(SimSourceProvider::new(cfg.run.market, cfg.sim.seed)),
        Box::new(NetLoadPredictor::default()),
        Box::new(JsonExportSink::new(cfg.export.dir.clone())),
    );

    info!(%range, "starting gridcast run");
    match pipeline.run(range, &cfg.run).await {
        Ok(result) => {
            info!(
                run_id = %result.run_id,
                rows = result.metadata.row_count,
                model = %result.metadata.model_tag,
                "run complete"
            );
            Ok(())
        }
        Err(RunError::IncompleteData(report)) => {
            // Upstream feeds may fill in later; the scheduler retries.
            warn!(rows = report.rows, "run rejected for incomplete data, retry later");
            for column in &report.columns {
                warn!(
                    column = %column.column,
                    coverage = column.coverage,
                    longest_gap = column.longest_gap,
                    passed = column.passed,
                    "column coverage"
                );
            }
            Err(RunError::IncompleteData(report).into())
        }
        Err(err) => Err(err.into()),
    }
}
