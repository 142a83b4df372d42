// tests/collect_logging.rs
use grid_price_collector::collect::types::{ApiKey, Endpoint};
use grid_price_collector::{
    Cadence, CollectorSettings, FetchRequest, FetchStatus, Fetcher, HttpFetcher, Orchestrator,
    RegionStatus, RetryPolicy, SourceDescriptor, SourceRegistry, Strategy,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// In-memory log sink for a thread-local subscriber.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

fn capture_logs() -> (Captured, tracing::subscriber::DefaultGuard) {
    let buf = Captured::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buf, guard)
}

fn settings() -> CollectorSettings {
    CollectorSettings {
        timeout_secs: 2,
        max_attempts: 2,
        backoff_base_ms: 5,
        inter_region_delay_ms: 0,
        ..CollectorSettings::default()
    }
}

fn descriptor(id: &str, base_url: &str, endpoints: Vec<Endpoint>) -> SourceDescriptor {
    SourceDescriptor {
        region_id: id.to_string(),
        region_name: id.to_string(),
        provider_name: "Op".to_string(),
        base_url: base_url.to_string(),
        cadence: Cadence::Periodic,
        currency: "USD".to_string(),
        endpoints,
        strategies: vec![Strategy::CurrencyPattern],
        api_key: None,
    }
}

#[tokio::test]
async fn api_key_never_reaches_the_logs() {
    let (logs, _guard) = capture_logs();

    let mut d = descriptor(
        "united_states",
        "http://127.0.0.1:1/v2/",
        vec![Endpoint::new("retail_price", "retail")],
    );
    d.api_key = Some(ApiKey {
        param: "api_key".into(),
        env: "TEST_LOG_EIA_KEY".into(),
        required: true,
        value: None,
    });
    let registry = SourceRegistry::new(vec![d])
        .unwrap()
        .resolve_api_keys_with(|_| Some("SECRET-KEY-42".to_string()));
    let orch = Orchestrator::with_http(Arc::new(registry), settings()).unwrap();

    let report = orch.run(None).await;
    assert_eq!(report.region("united_states").unwrap().status, RegionStatus::Error);
    assert!(!serde_json::to_string(&report).unwrap().contains("SECRET-KEY-42"));

    let out = logs.text();
    assert!(out.contains("fetch failed"), "expected failure logs, got: {out}");
    assert!(out.contains("http://127.0.0.1:1/v2/retail"));
    assert!(!out.contains("SECRET-KEY-42"), "key leaked into logs: {out}");
}

#[tokio::test]
async fn insecure_endpoint_is_fetched_and_warns_every_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tou"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Off-peak: 8.7¢/kWh</p>"))
        .expect(2)
        .mount(&server)
        .await;

    let (logs, _guard) = capture_logs();
    let d = descriptor(
        "british_columbia",
        &format!("{}/", server.uri()),
        vec![Endpoint::new("time_of_use_rates", "tou").insecure()],
    );
    assert!(d.endpoints[0].insecure_tls);
    let orch = Orchestrator::with_http(Arc::new(SourceRegistry::new(vec![d]).unwrap()), settings())
        .unwrap();

    for _ in 0..2 {
        let report = orch.run(None).await;
        let r = report.region("british_columbia").unwrap();
        assert_eq!(r.status, RegionStatus::Success);
        assert_eq!(r.rates[0].value.to_string(), "0.087");
    }
    assert_eq!(logs.text().matches("TLS verification disabled").count(), 2);
}

#[tokio::test]
async fn verified_endpoint_does_not_warn() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("$0.11"))
        .mount(&server)
        .await;

    let (logs, _guard) = capture_logs();
    let fetcher = HttpFetcher::new(RetryPolicy::default()).unwrap();
    let res = fetcher
        .fetch(&FetchRequest::new(
            format!("{}/rate", server.uri()),
            Duration::from_secs(2),
        ))
        .await;
    assert!(res.is_ok());
    assert!(!logs.text().contains("TLS verification disabled"));
}

#[tokio::test]
async fn malformed_request_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new(RetryPolicy {
        max_attempts: 3,
        backoff_base: Duration::from_secs(5),
    })
    .unwrap();
    let mut req = FetchRequest::new(format!("{}/x", server.uri()), Duration::from_secs(2));
    req.headers.push(("bad header\n".into(), "x".into()));

    let started = std::time::Instant::now();
    let res = fetcher.fetch(&req).await;
    assert_eq!(res.status, FetchStatus::NetworkError);
    assert_eq!(res.attempts, 1);
    assert!(res.error.is_some());
    assert!(started.elapsed() < Duration::from_secs(5));
}
