// src/collect/scheduler.rs
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::collect::sink::ReportSink;
use crate::collect::Orchestrator;

/// Spawn a periodic collection loop: run, hand the report to `sink`, wait.
///
/// The first run starts immediately. A run that outlasts `interval` delays the
/// next tick instead of stacking runs. Abort the handle to stop.
pub fn spawn_scheduler<S>(
    orchestrator: Arc<Orchestrator>,
    sink: Arc<S>,
    interval: Duration,
    region_ids: Option<Vec<String>>,
) -> JoinHandle<()>
where
    S: ReportSink + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = orchestrator.run(region_ids.as_deref()).await;
            if let Err(e) = sink.store(&report).await {
                tracing::warn!(target: "collect", error = ?e, "storing report failed");
            }
            tracing::info!(
                target: "collect",
                regions = report.summary.total_regions,
                successful = report.summary.successful,
                "scheduled collection tick"
            );
        }
    })
}
