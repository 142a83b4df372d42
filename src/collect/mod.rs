// src/collect/mod.rs
//! # Collection engine
//!
//! [`Orchestrator`] walks a [`SourceRegistry`] (or a caller-supplied subset)
//! in a fixed order, runs a [`RegionCollector`] per region with a courtesy
//! delay between regions, and folds everything into a [`RunReport`].
//!
//! The orchestrator has no failure path: unknown ids, misconfigured
//! descriptors and unreachable hosts all end up as `error` results.

pub mod config;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod region;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod types;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::collect::config::CollectorSettings;
use crate::collect::error::CollectError;
use crate::collect::extract::Extractor;
use crate::collect::fetcher::{Fetcher, HttpFetcher};
use crate::collect::region::RegionCollector;
use crate::collect::registry::SourceRegistry;
use crate::collect::types::{RegionResult, RegionStatus, RunReport, RunSummary};

/// One-time metrics registration (so series show up in the exposition).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("collect_runs_total", "Orchestrator runs completed.");
        describe_counter!(
            "collect_regions_total",
            "Regions collected, labelled by final status."
        );
        describe_counter!("collect_fetch_total", "HTTP attempts, retries included.");
        describe_counter!(
            "collect_fetch_errors_total",
            "Fetches that failed after all attempts."
        );
        describe_counter!("collect_rates_total", "Rates extracted across all regions.");
        describe_histogram!("collect_fetch_ms", "Fetch time in milliseconds, retries included.");
        describe_histogram!("collect_extract_ms", "Extraction time in milliseconds.");
        describe_gauge!("collect_last_run_ts", "Unix ts when the last run finished.");
    });
}

pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    collector: RegionCollector,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        fetcher: Arc<dyn Fetcher>,
        settings: CollectorSettings,
    ) -> Self {
        let extractor = Extractor::new(settings.bounds());
        Self {
            registry,
            collector: RegionCollector::new(fetcher, extractor, settings),
        }
    }

    /// Orchestrator backed by the reqwest fetcher configured from `settings`.
    pub fn with_http(registry: Arc<SourceRegistry>, settings: CollectorSettings) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new(settings.retry_policy())?;
        Ok(Self::new(registry, Arc::new(fetcher), settings))
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Collect `region_ids` in the given order, or the whole registry in
    /// declaration order when `None`.
    pub async fn run(&self, region_ids: Option<&[String]>) -> RunReport {
        let (_keep, rx) = watch::channel(false);
        self.run_with_cancel(region_ids, rx).await
    }

    /// Like [`run`](Self::run), but stops before the next region once `cancel`
    /// reads `true`. An in-flight region is always finished.
    pub async fn run_with_cancel(
        &self,
        region_ids: Option<&[String]>,
        mut cancel: watch::Receiver<bool>,
    ) -> RunReport {
        ensure_metrics_described();
        let collection_start = Utc::now();
        let t0 = std::time::Instant::now();

        let targets: Vec<String> = match region_ids {
            Some(ids) => ids.to_vec(),
            None => self.registry.ids().map(str::to_string).collect(),
        };
        let delay = self.collector.settings().inter_region_delay();

        let mut seen = HashSet::new();
        let mut results: Vec<RegionResult> = Vec::with_capacity(targets.len());
        let mut cancelled = false;
        let mut contacted_any = false;

        for id in &targets {
            if !seen.insert(id.as_str()) {
                tracing::warn!(target: "collect", region = %id, "region requested twice, skipping");
                continue;
            }
            if *cancel.borrow() {
                cancelled = true;
                break;
            }
            let Some(descriptor) = self.registry.get(id) else {
                let e = CollectError::UnknownRegion(id.clone());
                tracing::warn!(target: "collect", error = %e, "skipping region");
                results.push(RegionResult::failed(id, id, "", e.to_string()));
                continue;
            };

            // Misconfigured regions fail without a request, so they never wait.
            let result = match self.collector.prepare(descriptor) {
                Err(failed) => failed,
                Ok(plan) => {
                    if contacted_any && pause(delay, &mut cancel).await {
                        cancelled = true;
                        break;
                    }
                    contacted_any = true;
                    self.collector.run(plan).await
                }
            };
            counter!("collect_regions_total", "status" => status_label(result.status)).increment(1);
            results.push(result);
        }

        if cancelled {
            tracing::warn!(
                target: "collect",
                done = results.len(),
                requested = targets.len(),
                "run cancelled"
            );
        }

        let summary = RunSummary::from_results(&results);
        let collection_end = Utc::now();
        counter!("collect_runs_total").increment(1);
        gauge!("collect_last_run_ts").set(collection_end.timestamp() as f64);
        tracing::info!(
            target: "collect",
            total = summary.total_regions,
            successful = summary.successful,
            partial = summary.partial,
            failed = summary.failed,
            rates = summary.rates_collected_count,
            success_rate = summary.success_rate,
            "collection run finished"
        );

        RunReport {
            collection_start,
            collection_end,
            duration_seconds: t0.elapsed().as_secs_f64(),
            cancelled,
            region_results: results,
            summary,
        }
    }
}

fn status_label(s: RegionStatus) -> &'static str {
    match s {
        RegionStatus::Success => "success",
        RegionStatus::Partial => "partial",
        RegionStatus::Error => "error",
    }
}

/// Sleep for `delay` unless cancelled first. Returns whether the run is cancelled.
async fn pause(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if delay.is_zero() {
        return *cancel.borrow();
    }
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return *cancel.borrow(),
            changed = cancel.changed() => {
                if changed.is_err() {
                    // Sender gone: nobody can cancel any more.
                    (&mut sleep).await;
                    return *cancel.borrow();
                }
                if *cancel.borrow() {
                    return true;
                }
            }
        }
    }
}
