//! Export sink boundary.
//!
//! The sink persists one artifact per run identifier. Writes are atomic and
//! idempotent: re-running with the same id overwrites, never duplicates.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{FeatureMatrix, PredictionRow, RunMetadata};
use crate::pipeline::validate::CoverageReport;

#[cfg(test)]
use mockall::automock;

/// Everything persisted for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub run_id: Uuid,
    pub metadata: RunMetadata,
    pub matrix: FeatureMatrix,
    pub predictions: Vec<PredictionRow>,
    pub report: CoverageReport,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Idempotent write keyed by run id.
    async fn put(&self, run_id: Uuid, artifact: &RunArtifact) -> Result<()>;
}

/// In-memory sink for tests and dry runs. Cloning shares the store.
#[derive(Clone, Default)]
pub struct MemoryExportSink {
    blobs: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl MemoryExportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn get(&self, run_id: Uuid) -> Option<String> {
        self.blobs.read().await.get(&run_id).cloned()
    }
}

#[async_trait]
impl ExportSink for MemoryExportSink {
    async fn put(&self, run_id: Uuid, artifact: &RunArtifact) -> Result<()> {
        let blob = serde_json::to_string(artifact)?;
        self.blobs.write().await.insert(run_id, blob);
        Ok(())
    }
}

/// Filesystem sink: one `<run_id>.json` per run under `dir`.
///
/// Writes go to a temp file first and are renamed into place, so a reader
/// never observes a partial artifact and re-exports replace atomically.
pub struct JsonExportSink {
    dir: PathBuf,
}

impl JsonExportSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl ExportSink for JsonExportSink {
    async fn put(&self, run_id: Uuid, artifact: &RunArtifact) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating export dir {}", self.dir.display()))?;
        let blob = serde_json::to_vec_pretty(artifact)?;
        let tmp_path = self.dir.join(format!("{run_id}.json.tmp"));
        let final_path = self.dir.join(format!("{run_id}.json"));
        fs::write(&tmp_path, &blob)
            .await
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path)
            .await
            .with_context(|| format!("renaming into {}", final_path.display()))?;
        Ok(())
    }
}
