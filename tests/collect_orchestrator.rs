// tests/collect_orchestrator.rs
use async_trait::async_trait;
use chrono::Utc;
use grid_price_collector::collect::types::Endpoint;
use grid_price_collector::{
    Cadence, CollectorSettings, FetchRequest, FetchResult, FetchStatus, Fetcher, Orchestrator,
    RegionStatus, SourceDescriptor, SourceRegistry, Strategy,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Serves canned bodies by URL; anything unknown is a connection error.
#[derive(Default)]
struct ScriptedFetcher {
    pages: HashMap<String, String>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedFetcher {
    fn with(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(u, b)| (u.to_string(), b.to_string()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, req: &FetchRequest) -> FetchResult {
        self.calls
            .lock()
            .unwrap()
            .push((req.url.clone(), Instant::now()));
        let body = self.pages.get(&req.url).cloned();
        FetchResult {
            status: if body.is_some() {
                FetchStatus::Ok
            } else {
                FetchStatus::NetworkError
            },
            http_status_code: body.as_ref().map(|_| 200),
            error: body.is_none().then(|| "connection refused".to_string()),
            raw_content: body,
            attempted_at: Utc::now(),
            elapsed_ms: 1,
            attempts: 1,
        }
    }
}

fn region(id: &str, labels: &[&str]) -> SourceDescriptor {
    SourceDescriptor {
        region_id: id.to_string(),
        region_name: id.to_string(),
        provider_name: "Op".to_string(),
        base_url: format!("http://{id}.test/"),
        cadence: Cadence::Daily,
        currency: "CAD".to_string(),
        endpoints: labels.iter().map(|l| Endpoint::new(*l, *l)).collect(),
        strategies: vec![Strategy::CurrencyPattern],
        api_key: None,
    }
}

fn build(
    regions: Vec<SourceDescriptor>,
    fetcher: Arc<ScriptedFetcher>,
    delay_ms: u64,
) -> Orchestrator {
    let settings = CollectorSettings {
        inter_region_delay_ms: delay_ms,
        ..CollectorSettings::default()
    };
    Orchestrator::new(
        Arc::new(SourceRegistry::new(regions).unwrap()),
        fetcher,
        settings,
    )
}

#[tokio::test]
async fn empty_subset_yields_empty_report() {
    let f = Arc::new(ScriptedFetcher::default());
    let orch = build(vec![region("a", &["p"])], f.clone(), 0);
    let report = orch.run(Some(&[])).await;
    assert_eq!(report.summary.total_regions, 0);
    assert_eq!(report.summary.success_rate, 0.0);
    assert_eq!(report.summary.rates_collected_count, 0);
    assert!(report.region_results.is_empty());
    assert!(f.urls().is_empty());
    assert!(report.collection_end >= report.collection_start);
}

#[tokio::test]
async fn statuses_and_summary_invariants() {
    let f = Arc::new(ScriptedFetcher::with(&[
        ("http://ok.test/p", "<p>$1.10</p><p>$2.20</p>"),
        ("http://half.test/p", "<p>$3.30</p>"),
        ("http://blank.test/p", "<p>no prices today</p>"),
    ]));
    let orch = build(
        vec![
            region("ok", &["p"]),
            region("half", &["p", "q"]),
            region("blank", &["p"]),
            region("down", &["p"]),
        ],
        f,
        0,
    );
    let report = orch.run(None).await;

    let status = |id: &str| report.region(id).unwrap().status;
    assert_eq!(status("ok"), RegionStatus::Success);
    assert_eq!(status("half"), RegionStatus::Partial);
    assert_eq!(status("blank"), RegionStatus::Error);
    assert_eq!(status("down"), RegionStatus::Error);
    assert_eq!(
        report.region("blank").unwrap().error.as_deref(),
        Some("no rates extracted")
    );

    for r in &report.region_results {
        assert_eq!(r.status == RegionStatus::Error, r.rates.is_empty());
    }
    let total: usize = report.region_results.iter().map(|r| r.rates.len()).sum();
    assert_eq!(report.summary.rates_collected_count, total);
    assert_eq!(report.summary.total_regions, 4);
    assert_eq!(report.summary.successful, 1);
    assert_eq!(report.summary.partial, 1);
    assert_eq!(report.summary.failed, 2);
    assert!((report.summary.success_rate - 0.25).abs() < f64::EPSILON);
}

#[tokio::test]
async fn subset_order_unknown_and_duplicate_ids() {
    let f = Arc::new(ScriptedFetcher::with(&[
        ("http://a.test/p", "$1.00"),
        ("http://b.test/p", "$2.00"),
    ]));
    let orch = build(vec![region("a", &["p"]), region("b", &["p"])], f.clone(), 0);
    let ids: Vec<String> = ["b", "zz", "a", "b"].iter().map(|s| s.to_string()).collect();
    let report = orch.run(Some(&ids)).await;

    let order: Vec<&str> = report
        .region_results
        .iter()
        .map(|r| r.region_id.as_str())
        .collect();
    assert_eq!(order, vec!["b", "zz", "a"]);
    assert_eq!(f.urls(), vec!["http://b.test/p", "http://a.test/p"]);

    let zz = report.region("zz").unwrap();
    assert_eq!(zz.status, RegionStatus::Error);
    assert!(zz.error.as_deref().unwrap().contains("unknown region"));
    assert!((report.summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn misconfigured_region_does_not_stop_the_run() {
    let f = Arc::new(ScriptedFetcher::with(&[("http://c.test/p", "$5.00")]));
    let mut broken = region("broken", &[]);
    broken.base_url = "::not a url::".into();
    let orch = build(vec![region("a", &["p"]), broken, region("c", &["p"])], f, 0);
    let report = orch.run(None).await;
    assert_eq!(report.region_results.len(), 3);
    assert_eq!(report.region("broken").unwrap().status, RegionStatus::Error);
    assert!(report
        .region("broken")
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("configuration error"));
    assert_eq!(report.region("c").unwrap().status, RegionStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn delay_is_applied_between_regions_only() {
    let f = Arc::new(ScriptedFetcher::with(&[
        ("http://a.test/p", "$1.00"),
        ("http://a.test/q", "$1.50"),
        ("http://b.test/p", "$2.00"),
        ("http://c.test/p", "$3.00"),
    ]));
    let orch = build(
        vec![region("a", &["p", "q"]), region("b", &["p"]), region("c", &["p"])],
        f.clone(),
        3000,
    );
    let t0 = Instant::now();
    orch.run(None).await;

    let calls = f.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 4);
    // Endpoints inside a region are not throttled.
    assert!(calls[1].1 - calls[0].1 < Duration::from_secs(1));
    assert!(calls[2].1 - calls[1].1 >= Duration::from_secs(3));
    assert!(calls[3].1 - calls[2].1 >= Duration::from_secs(3));
    // No trailing delay after the last region.
    assert!(t0.elapsed() < Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn misconfigured_region_adds_no_delay() {
    let f = Arc::new(ScriptedFetcher::with(&[
        ("http://a.test/p", "$1.00"),
        ("http://c.test/p", "$3.00"),
    ]));
    let mut broken = region("broken", &["p"]);
    broken.base_url = "::not a url::".into();
    let orch = build(vec![region("a", &["p"]), broken, region("c", &["p"])], f.clone(), 3000);
    let t0 = Instant::now();
    let report = orch.run(None).await;

    assert_eq!(report.region("broken").unwrap().status, RegionStatus::Error);
    let calls = f.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    let gap = calls[1].1 - calls[0].1;
    assert!(gap >= Duration::from_secs(3));
    assert!(gap < Duration::from_secs(6));
    assert!(t0.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_between_regions() {
    let f = Arc::new(ScriptedFetcher::with(&[
        ("http://a.test/p", "$1.00"),
        ("http://b.test/p", "$2.00"),
        ("http://c.test/p", "$3.00"),
    ]));
    let orch = build(
        vec![region("a", &["p"]), region("b", &["p"]), region("c", &["p"])],
        f.clone(),
        3000,
    );
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = tx.send(true);
    });
    let report = orch.run_with_cancel(None, rx).await;

    assert!(report.cancelled);
    assert_eq!(report.region_results.len(), 1);
    assert_eq!(report.summary.total_regions, 1);
    assert_eq!(f.urls(), vec!["http://a.test/p"]);
}

#[tokio::test]
async fn extraction_is_deterministic_across_runs() {
    let page = "<table><tr><th>Hour</th><th>Price</th></tr><tr><td>1</td><td>$52.10</td></tr></table><p>$9.99</p>";
    let f = Arc::new(ScriptedFetcher::with(&[("http://a.test/p", page)]));
    let orch = build(vec![region("a", &["p"])], f, 0);
    let first = orch.run(None).await;
    let second = orch.run(None).await;
    assert_eq!(
        first.region("a").unwrap().rates,
        second.region("a").unwrap().rates
    );
}
