// src/collect/sink.rs
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::collect::types::RunReport;

#[async_trait::async_trait]
pub trait ReportSink: Send + Sync {
    /// Persist one finished report.
    async fn store(&self, report: &RunReport) -> Result<()>;
}

/// Writes `<dir>/collection_results_<YYYYmmdd_HHMMSS>.json`, pretty-printed.
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, report: &RunReport) -> PathBuf {
        let ts = report.collection_start.format("%Y%m%d_%H%M%S");
        self.dir.join(format!("collection_results_{ts}.json"))
    }
}

#[async_trait::async_trait]
impl ReportSink for JsonFileSink {
    async fn store(&self, report: &RunReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(report);
        let body = serde_json::to_vec_pretty(report).context("serializing run report")?;
        // Write then rename so readers never see a half-written file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming into {}", path.display()))?;
        tracing::info!(target: "collect", path = %path.display(), bytes = body.len(), "report saved");
        Ok(())
    }
}

/// Keeps reports in memory; handy for tests and embedding.
#[derive(Default)]
pub struct MemorySink {
    pub reports: std::sync::Mutex<Vec<RunReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ReportSink for MemorySink {
    async fn store(&self, report: &RunReport) -> Result<()> {
        self.reports
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(report.clone());
        Ok(())
    }
}
