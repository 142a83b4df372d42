//! Grid Price Collector: binary entrypoint.
//! Loads the source registry, runs a collection (once, or periodically) and
//! saves each run report as JSON.
//!
//! Environment:
//!   COLLECTOR_OUTPUT_DIR     report directory (default `data/collection`)
//!   COLLECTOR_REGIONS        comma-separated region ids (default: all)
//!   COLLECTOR_INTERVAL_SECS  run periodically instead of once
//!   COLLECTOR_METRICS_PATH   write Prometheus text here after each run
//!   COLLECTOR_LOG_JSON=1     JSON log lines

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use grid_price_collector::collect::scheduler::spawn_scheduler;
use grid_price_collector::metrics::Metrics;
use grid_price_collector::{load_default, JsonFileSink, Orchestrator, ReportSink, RunReport};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("grid_price_collector=info,warn"));
    let json = std::env::var("COLLECTOR_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

/// Saves the report, then refreshes the metrics file if one is configured.
struct OutputSink {
    json: JsonFileSink,
    metrics: Option<(Metrics, PathBuf)>,
}

#[async_trait::async_trait]
impl ReportSink for OutputSink {
    async fn store(&self, report: &RunReport) -> Result<()> {
        self.json.store(report).await?;
        if let Some((m, path)) = &self.metrics {
            if let Err(e) = m.write_to(path) {
                tracing::warn!(error = ?e, "metrics file not written");
            }
        }
        Ok(())
    }
}

fn region_filter() -> Option<Vec<String>> {
    let raw = std::env::var("COLLECTOR_REGIONS").ok()?;
    let ids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!ids.is_empty()).then_some(ids)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = load_default()?;
    tracing::info!(
        source = %cfg.source.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "builtin".into()),
        regions = cfg.registry.len(),
        timeout_secs = cfg.settings.timeout_secs,
        delay_ms = cfg.settings.inter_region_delay_ms,
        "registry loaded"
    );
    for r in cfg.registry.summary() {
        tracing::debug!(id = %r.id, provider = %r.provider, cadence = ?r.cadence, endpoints = r.endpoints, "source");
    }

    let metrics = match std::env::var("COLLECTOR_METRICS_PATH") {
        Ok(p) => Some((Metrics::init()?, PathBuf::from(p))),
        Err(_) => None,
    };
    let out_dir = std::env::var("COLLECTOR_OUTPUT_DIR").unwrap_or_else(|_| "data/collection".into());
    let sink = Arc::new(OutputSink {
        json: JsonFileSink::new(out_dir),
        metrics,
    });

    let orchestrator = Arc::new(Orchestrator::with_http(Arc::new(cfg.registry), cfg.settings)?);
    let regions = region_filter();

    let interval = std::env::var("COLLECTOR_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|s| *s > 0);

    match interval {
        Some(secs) => {
            let handle = spawn_scheduler(orchestrator, sink, Duration::from_secs(secs), regions);
            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown requested");
            handle.abort();
        }
        None => {
            let (tx, rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("cancelling after the current region");
                    let _ = tx.send(true);
                }
            });
            let report = orchestrator.run_with_cancel(regions.as_deref(), rx).await;
            sink.store(&report).await?;
        }
    }
    Ok(())
}
