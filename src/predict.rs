//! Predictor boundary.
//!
//! The statistical model that turns features into prices is an opaque
//! collaborator: it receives the validated, immutable matrix and returns one
//! prediction per delivery key. `NetLoadPredictor` is the deterministic
//! baseline used when no trained model is wired in.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{FeatureMatrix, PredictionRow, SourceId};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Predict a settlement price for every row of the matrix, aligned 1:1
    /// by delivery key.
    async fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<PredictionRow>>;
}

const MODEL_TAG: &str = "net-load-baseline/v1";

/// Baseline model: price scales with net load (load minus renewables)
/// shaped by morning and evening demand peaks.
pub struct NetLoadPredictor {
    pub base_price: f64,
    pub net_load_weight: f64,
}

impl Default for NetLoadPredictor {
    fn default() -> Self {
        Self {
            base_price: 22.0,
            net_load_weight: 0.0008,
        }
    }
}

#[async_trait]
impl Predictor for NetLoadPredictor {
    async fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<PredictionRow>> {
        let generated_at = Utc::now();
        let rows = matrix
            .rows
            .iter()
            .map(|row| {
                // Optional columns may be missing past validation; they
                // simply contribute nothing to net load.
                let value = |s: SourceId| row.cell(s).value().unwrap_or(0.0);
                let net_load = value(SourceId::Load) - value(SourceId::Solar) - value(SourceId::Wind);
                let h = row.key.hour as f64 - 0.5;
                let shape = 1.0 + 0.25 * bump(h, 8.0, 2.0) + 0.6 * bump(h, 18.5, 2.5);
                PredictionRow {
                    key: row.key,
                    price_usd_per_mwh: (self.base_price + self.net_load_weight * net_load) * shape,
                    model_tag: MODEL_TAG.to_string(),
                    generated_at,
                }
            })
            .collect();
        Ok(rows)
    }
}

fn bump(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma.max(0.01);
    (-0.5 * z * z).exp()
}
